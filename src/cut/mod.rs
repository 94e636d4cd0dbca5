pub mod chapters;
pub mod ffmpeg;
pub mod plan;

pub use chapters::{adjust_chapters_after_cut, retime_chapters};
pub use ffmpeg::{Encoder, FfmpegEncoder};
pub use plan::{build_keep_segments, kept_duration, merge_and_pad};
