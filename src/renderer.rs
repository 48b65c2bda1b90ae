//! # Weather Display Rendering
//!
//! Turns a [`WeatherRecord`] into either terminal text (development mode) or a
//! monochrome bitmap for a panel. Both renderers show the same six lines in the
//! same order:
//!
//! ```text
//! Temperature: 18.5°C
//! Pressure: 1012 hPa
//! Humidity: 40%
//! clear sky
//! Sunrise: 06:42
//! Sunset: 17:05
//! ```
//!
//! The bitmap path draws onto any `embedded-graphics` [`DrawTarget`] with
//! [`BinaryColor`] pixels. [`Framebuffer`] is the in-memory target used by the
//! binary; it exports PBM so the image can be pushed to a panel driver or
//! inspected on a desktop.

use crate::WeatherRecord;
use embedded_graphics::{
    mono_font::{iso_8859_1::FONT_10X20, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use std::convert::Infallible;

/// Left margin of every text line, in pixels.
const TEXT_LEFT: i32 = 20;
/// Top edge of the first line and the distance between lines.
const FIRST_LINE_TOP: i32 = 20;
const LINE_SPACING: i32 = 40;

/// The display lines for `record`, top to bottom.
pub fn weather_lines(record: &WeatherRecord) -> [String; 6] {
    [
        format!("Temperature: {:.1}°C", record.temperature_c),
        format!("Pressure: {} hPa", record.pressure_hpa),
        format!("Humidity: {}%", record.humidity_pct),
        record.description.clone(),
        format!("Sunrise: {}", record.sunrise_hhmm()),
        format!("Sunset: {}", record.sunset_hhmm()),
    ]
}

/// Terminal rendering of `record`, one line per entry.
pub fn format_ascii(record: &WeatherRecord) -> String {
    let mut out = String::new();
    for line in weather_lines(record) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Print the terminal rendering to stdout.
pub fn draw_ascii(record: &WeatherRecord) {
    print!("{}", format_ascii(record));
}

/// Render `record` onto a monochrome display.
///
/// The target is cleared first; text is drawn with [`BinaryColor::On`].
pub fn draw_display<D>(record: &WeatherRecord, display: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    display.clear(BinaryColor::Off)?;

    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    for (index, line) in weather_lines(record).iter().enumerate() {
        let top = FIRST_LINE_TOP + LINE_SPACING * index as i32;
        Text::with_baseline(line, Point::new(TEXT_LEFT, top), style, Baseline::Top)
            .draw(display)?;
    }
    Ok(())
}

/// 1-bit in-memory draw target, packed eight pixels per byte, MSB first.
///
/// A set bit is an [`BinaryColor::On`] (black) pixel, matching PBM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = Self::stride_for(width);
        Self {
            width,
            height,
            bits: vec![0; stride * height as usize],
        }
    }

    fn stride_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    fn index(&self, x: i32, y: i32) -> Option<(usize, u8)> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let stride = Self::stride_for(self.width);
        let byte = y as usize * stride + x as usize / 8;
        let mask = 0x80u8 >> (x as usize % 8);
        Some((byte, mask))
    }

    /// Color at `(x, y)`; `None` outside the buffer.
    pub fn pixel(&self, x: i32, y: i32) -> Option<BinaryColor> {
        self.index(x, y).map(|(byte, mask)| {
            if self.bits[byte] & mask != 0 {
                BinaryColor::On
            } else {
                BinaryColor::Off
            }
        })
    }

    /// Number of pixels currently on.
    pub fn lit_pixels(&self) -> usize {
        self.bits.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// Binary PBM (P4) image of the buffer.
    pub fn to_pbm(&self) -> Vec<u8> {
        let mut out = format!("P4\n{} {}\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.bits);
        out
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            // Off-screen pixels are clipped
            if let Some((byte, mask)) = self.index(point.x, point.y) {
                match color {
                    BinaryColor::On => self.bits[byte] |= mask,
                    BinaryColor::Off => self.bits[byte] &= !mask,
                }
            }
        }
        Ok(())
    }
}
