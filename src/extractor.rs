pub mod rustube;
pub mod ytdlp;

/// Which end of the available audio-only formats an extraction should pick.
/// Previews take the cheap stream, downloads the best one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityHint {
  Lowest,
  Highest,
}
