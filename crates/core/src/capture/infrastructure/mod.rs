pub mod channel_sink;
pub mod ffmpeg_camera_source;
pub mod image_sequence_source;
