/// Playback introspection supplied by the host application.
///
/// Implementations wrap whatever playback engine the host uses and must be
/// callable at sampling cadence without blocking; a stalled adapter call
/// delays measurement for its own session only.
pub trait PlayerAdapter: Send + Sync {
    /// Current playback position in seconds, always >= 0.
    fn position(&self) -> u32;

    /// Stream duration in seconds. Live content for which no duration is
    /// known must report 0; a positive value, once reported, is locked in
    /// by the session and never retracted.
    fn duration(&self) -> u32;

    /// Video width in pixels, 0 for non-video content.
    fn width(&self) -> u32;

    /// Video height in pixels, 0 for non-video content.
    fn height(&self) -> u32;

    /// Whether playback is currently being cast to a remote device.
    fn is_casting_enabled(&self) -> bool {
        false
    }
}

/// A single observation read from the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSample {
    pub position: u32,
    pub duration: u32,
    pub width: u32,
    pub height: u32,
    pub casting: bool,
}

impl PlayerSample {
    pub fn read_from(adapter: &dyn PlayerAdapter) -> Self {
        Self {
            position: adapter.position(),
            duration: adapter.duration(),
            width: adapter.width(),
            height: adapter.height(),
            casting: adapter.is_casting_enabled(),
        }
    }
}
