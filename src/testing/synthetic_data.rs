//! Synthetic test pattern source

use crate::types::CameraFrame;

/// Device id that selects the synthetic source regardless of stream mode
pub const SYNTHETIC_DEVICE_ID: &str = "synthetic";

/// Create a synthetic RGB24 frame.
///
/// The gradient shifts every frame so the encoder sees temporal change.
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> CameraFrame {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; w * h * 3];

    let base = (frame_number % 256) as u8;
    if w == 0 {
        return CameraFrame::new(data, width, height, SYNTHETIC_DEVICE_ID.to_string());
    }
    for (y, row) in data.chunks_exact_mut(w * 3).enumerate() {
        for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
            pixel[0] = base.wrapping_add(x as u8);
            pixel[1] = base.wrapping_add(y as u8);
            pixel[2] = base.wrapping_add((x + y) as u8);
        }
    }

    CameraFrame::new(data, width, height, SYNTHETIC_DEVICE_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frame_shape() {
        let frame = synthetic_video_frame(0, 64, 48);
        assert!(frame.is_valid());
        assert_eq!(frame.device_id, SYNTHETIC_DEVICE_ID);
        assert_eq!(frame.format, "RGB8");
    }

    #[test]
    fn test_synthetic_frame_pixels() {
        let frame = synthetic_video_frame(3, 300, 2);
        // Pixel (x=299, y=1) wraps the 8-bit gradient
        let idx = (300 + 299) * 3;
        assert_eq!(frame.data[idx], 3u8.wrapping_add(299u32 as u8));
        assert_eq!(frame.data[idx + 1], 4);
        assert_eq!(frame.data[idx + 2], 3u8.wrapping_add(300u32 as u8));
    }

    #[test]
    fn test_synthetic_frames_change_over_time() {
        let a = synthetic_video_frame(0, 16, 16);
        let b = synthetic_video_frame(1, 16, 16);
        assert_ne!(a.data, b.data);
    }
}
