//! Per-frame information supplied by the frame driver.

use glam::{Mat4, UVec2, Vec2, Vec3};

/// Timing and view state for the frame being rendered.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    /// Render clock in seconds. Monotonic across frames.
    pub current_time: f64,
    /// Duration of the previous frame in seconds.
    pub frame_duration: f32,
    /// Combined view and model matrix.
    pub view_model: Mat4,
    /// Projection matrix.
    pub projection: Mat4,
    /// `projection * view_model`.
    pub mvp: Mat4,
    /// Inverse of `mvp`.
    pub mvp_inverse: Mat4,
    /// Normal matrix for `view_model`.
    pub view_model_normal: Mat4,
    /// Normal matrix for `mvp`.
    pub mvp_normal: Mat4,
    /// Framebuffer size in pixels.
    pub framebuffer_size: UVec2,
    /// Framebuffer extent in display coordinates.
    pub screen_size_display: Vec2,
    /// Direction the viewer is looking.
    pub eye_vec: Vec3,
    /// Viewer position.
    pub eye_pos: Vec3,
}

impl FrameInfo {
    /// Create frame info, deriving the combined and normal matrices.
    pub fn new(current_time: f64, frame_duration: f32, view_model: Mat4, projection: Mat4) -> Self {
        let mvp = projection * view_model;
        Self {
            current_time,
            frame_duration,
            view_model,
            projection,
            mvp,
            mvp_inverse: mvp.inverse(),
            view_model_normal: view_model.inverse().transpose(),
            mvp_normal: mvp.inverse().transpose(),
            framebuffer_size: UVec2::new(1, 1),
            screen_size_display: Vec2::ONE,
            eye_vec: Vec3::NEG_Z,
            eye_pos: Vec3::ZERO,
        }
    }

    /// Frame info with identity matrices, useful for headless driving.
    pub fn at_time(current_time: f64) -> Self {
        Self::new(current_time, 0.0, Mat4::IDENTITY, Mat4::IDENTITY)
    }

    /// Set the framebuffer size and its extent in display coordinates.
    pub fn with_screen(mut self, framebuffer_size: UVec2, screen_size_display: Vec2) -> Self {
        self.framebuffer_size = framebuffer_size.max(UVec2::ONE);
        self.screen_size_display = screen_size_display;
        self
    }

    /// Set the viewer position and look direction.
    pub fn with_eye(mut self, eye_pos: Vec3, eye_vec: Vec3) -> Self {
        self.eye_pos = eye_pos;
        self.eye_vec = eye_vec;
        self
    }

    /// Set the previous frame duration.
    pub fn with_frame_duration(mut self, frame_duration: f32) -> Self {
        self.frame_duration = frame_duration;
        self
    }

    /// Scale from pixels to normalized device coordinates.
    pub fn pixel_scale(&self) -> Vec2 {
        let size = self.framebuffer_size.as_vec2();
        Vec2::new(2.0 / size.x, 2.0 / size.y)
    }

    /// Size of a single pixel in display coordinates.
    pub fn pixel_display_size(&self) -> Vec2 {
        self.screen_size_display / self.framebuffer_size.as_vec2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn derived_matrices() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
        let frame = FrameInfo::new(1.0, 0.016, view, proj);

        let round_trip = frame.mvp * frame.mvp_inverse;
        for (a, b) in round_trip
            .to_cols_array()
            .iter()
            .zip(Mat4::IDENTITY.to_cols_array().iter())
        {
            assert_relative_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn pixel_scale_from_framebuffer() {
        let frame = FrameInfo::at_time(0.0).with_screen(UVec2::new(800, 400), Vec2::new(2.0, 1.0));
        let scale = frame.pixel_scale();
        assert_relative_eq!(scale.x, 2.0 / 800.0);
        assert_relative_eq!(scale.y, 2.0 / 400.0);

        let pix = frame.pixel_display_size();
        assert_relative_eq!(pix.x, 2.0 / 800.0);
        assert_relative_eq!(pix.y, 1.0 / 400.0);
    }

    #[test]
    fn zero_framebuffer_is_clamped() {
        let frame = FrameInfo::at_time(0.0).with_screen(UVec2::ZERO, Vec2::ONE);
        assert_eq!(frame.framebuffer_size, UVec2::ONE);
        assert!(frame.pixel_scale().is_finite());
    }
}
