use std::convert::Infallible;
use std::time::Duration;

use log::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// `0xRRGGBB`
    pub const fn from_hex(hex: u32) -> Self {
        Rgb::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
    }

    /// Scales every channel by `brightness / 255`.
    pub fn scaled(self, brightness: u8) -> Self {
        let scale = |c: u8| ((c as u16 * brightness as u16) / 255) as u8;
        Rgb::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Sink for the single status light.
pub trait Indicator {
    fn set_color(&mut self, color: Rgb);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndicatorColors {
    pub tag_present: Rgb,
    pub connected: Rgb,
    pub connecting: Rgb,
    pub error: Rgb,
    pub synced: Rgb,
}

impl Default for IndicatorColors {
    fn default() -> Self {
        IndicatorColors {
            tag_present: Rgb::from_hex(0x00FF00),
            connected: Rgb::from_hex(0x0000FF),
            connecting: Rgb::from_hex(0x0000FF),
            error: Rgb::from_hex(0xFF0000),
            synced: Rgb::from_hex(0xFF00FF),
        }
    }
}

impl IndicatorColors {
    /// Steady-state color shown at the end of every tick.
    pub fn steady(&self, classified_tag_present: bool, connected: bool) -> Rgb {
        if classified_tag_present {
            self.tag_present
        } else if connected {
            self.connected
        } else {
            self.error
        }
    }
}

/// Blink period while associating with a network.
pub const ACQUIRE_BLINK_INTERVAL: Duration = Duration::from_millis(200);
/// Faster than [`ACQUIRE_BLINK_INTERVAL`] so a dead device is never
/// mistaken for one that is still connecting.
pub const FATAL_BLINK_INTERVAL: Duration = Duration::from_millis(100);

/// Blinks the error color forever. Used when the device cannot start.
pub async fn halt<I: Indicator>(
    indicator: &mut I,
    color: Rgb,
    cause: &dyn std::error::Error,
) -> Infallible {
    error!("Fatal startup error: {}", cause);
    loop {
        indicator.set_color(color);
        tokio::time::sleep(FATAL_BLINK_INTERVAL).await;
        indicator.set_color(Rgb::OFF);
        tokio::time::sleep(FATAL_BLINK_INTERVAL).await;
    }
}
