// src/color.rs
//
// Colour and channel vocabulary shared by the operations.
// Colours parse from named values or #RRGGBB[AA] hex; channel masks
// parse from strings of channel letters in any order.

use bitflags::bitflags;
use image::Rgba;

/// RGBA8 colour value object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0, 255);
    pub const WHITE: Color = Color::new(255, 255, 255, 255);
    pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a colour token: a named colour or `#RRGGBB` / `#RRGGBBAA`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "black" => return Some(Self::BLACK),
            "white" => return Some(Self::WHITE),
            "grey" | "gray" => return Some(Self::new(128, 128, 128, 255)),
            "red" => return Some(Self::new(255, 0, 0, 255)),
            "green" => return Some(Self::new(0, 255, 0, 255)),
            "blue" => return Some(Self::new(0, 0, 255, 255)),
            "trans" | "transparent" => return Some(Self::TRANSPARENT),
            _ => {}
        }
        let hex = token.strip_prefix('#')?;
        match hex.len() {
            6 => {
                let v = u32::from_str_radix(hex, 16).ok()?;
                Some(Self::new(
                    (v >> 16) as u8,
                    (v >> 8) as u8,
                    v as u8,
                    255,
                ))
            }
            8 => {
                let v = u32::from_str_radix(hex, 16).ok()?;
                Some(Self::new(
                    (v >> 24) as u8,
                    (v >> 16) as u8,
                    (v >> 8) as u8,
                    v as u8,
                ))
            }
            _ => None,
        }
    }

    pub fn component(&self, channel: Channel) -> u8 {
        match channel {
            Channel::R => self.r,
            Channel::G => self.g,
            Channel::B => self.b,
            Channel::A => self.a,
        }
    }

    /// Rec.601 perceptual intensity of the RGB components.
    pub fn intensity(&self) -> u8 {
        let y = 0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32;
        y.round().clamp(0.0, 255.0) as u8
    }
}

impl From<Rgba<u8>> for Color {
    fn from(p: Rgba<u8>) -> Self {
        Self::new(p.0[0], p.0[1], p.0[2], p.0[3])
    }
}

impl From<Color> for Rgba<u8> {
    fn from(c: Color) -> Self {
        Rgba([c.r, c.g, c.b, c.a])
    }
}

bitflags! {
    /// Which of the four components an operation touches.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ChannelMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const RGB = Self::R.bits() | Self::G.bits() | Self::B.bits();
        const RGBA = Self::RGB.bits() | Self::A.bits();
    }
}

impl ChannelMask {
    /// Parse from channel letters in any order/case. `*` means all four.
    /// Returns None when the token contains no recognizable letters.
    pub fn from_token(token: &str) -> Option<Self> {
        if token == "*" {
            return Some(Self::RGBA);
        }
        let mut mask = Self::empty();
        for ch in token.chars() {
            match ch.to_ascii_uppercase() {
                'R' => mask |= Self::R,
                'G' => mask |= Self::G,
                'B' => mask |= Self::B,
                'A' => mask |= Self::A,
                _ => return None,
            }
        }
        if mask.is_empty() {
            None
        } else {
            Some(mask)
        }
    }

    /// The single channel selected, if exactly one is.
    pub fn single(&self) -> Option<Channel> {
        match *self {
            Self::R => Some(Channel::R),
            Self::G => Some(Channel::G),
            Self::B => Some(Channel::B),
            Self::A => Some(Channel::A),
            _ => None,
        }
    }
}

/// One pixel component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
    A,
}

impl Channel {
    pub fn index(&self) -> usize {
        match self {
            Self::R => 0,
            Self::G => 1,
            Self::B => 2,
            Self::A => 3,
        }
    }
}

/// A swizzle source: a component of the original pixel, or a constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwizzleSource {
    Component(Channel),
    Zero,
    One,
}

impl SwizzleSource {
    pub fn from_token(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let ch = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match ch.to_ascii_uppercase() {
            'R' => Some(Self::Component(Channel::R)),
            'G' => Some(Self::Component(Channel::G)),
            'B' => Some(Self::Component(Channel::B)),
            'A' => Some(Self::Component(Channel::A)),
            '0' => Some(Self::Zero),
            '1' => Some(Self::One),
            _ => None,
        }
    }

    pub fn sample(&self, original: Rgba<u8>) -> u8 {
        match self {
            Self::Component(c) => original.0[c.index()],
            Self::Zero => 0x00,
            Self::One => 0xFF,
        }
    }
}

/// Channel selector for the tonal adjustments (levels/contrast/brightness).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjustChannels {
    Rgb,
    R,
    G,
    B,
    A,
}

impl AdjustChannels {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "rgb" | "*" => Some(Self::Rgb),
            "r" => Some(Self::R),
            "g" => Some(Self::G),
            "b" => Some(Self::B),
            "a" => Some(Self::A),
            _ => None,
        }
    }

    pub fn indices(&self) -> &'static [usize] {
        match self {
            Self::Rgb => &[0, 1, 2],
            Self::R => &[0],
            Self::G => &[1],
            Self::B => &[2],
            Self::A => &[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_hex_colours_parse() {
        assert_eq!(Color::from_token("black"), Some(Color::BLACK));
        assert_eq!(Color::from_token("Trans"), Some(Color::TRANSPARENT));
        assert_eq!(
            Color::from_token("#80ff0040"),
            Some(Color::new(128, 255, 0, 64))
        );
        assert_eq!(
            Color::from_token("#112233"),
            Some(Color::new(0x11, 0x22, 0x33, 255))
        );
        assert_eq!(Color::from_token("#12345"), None);
        assert_eq!(Color::from_token("mauve"), None);
    }

    #[test]
    fn channel_mask_parses_any_order() {
        assert_eq!(ChannelMask::from_token("rgba"), Some(ChannelMask::RGBA));
        assert_eq!(ChannelMask::from_token("AG"), Some(ChannelMask::A | ChannelMask::G));
        assert_eq!(ChannelMask::from_token("*"), Some(ChannelMask::RGBA));
        assert_eq!(ChannelMask::from_token("xyz"), None);
        assert_eq!(ChannelMask::from_token(""), None);
    }

    #[test]
    fn single_channel_detection() {
        assert_eq!(ChannelMask::R.single(), Some(Channel::R));
        assert_eq!(ChannelMask::RGB.single(), None);
    }

    #[test]
    fn swizzle_sources() {
        assert_eq!(
            SwizzleSource::from_token("r"),
            Some(SwizzleSource::Component(Channel::R))
        );
        assert_eq!(SwizzleSource::from_token("0"), Some(SwizzleSource::Zero));
        assert_eq!(SwizzleSource::from_token("rg"), None);
        let px = Rgba([10, 20, 30, 40]);
        assert_eq!(SwizzleSource::One.sample(px), 0xFF);
        assert_eq!(SwizzleSource::Component(Channel::B).sample(px), 30);
    }
}
