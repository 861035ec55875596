//! Inline avatar rendering through the Kitty graphics protocol.
//!
//! Works in Kitty, `WezTerm` and Ghostty. Other terminals get nothing from
//! [`display_image`]; callers check [`is_supported`] first.

use base64::Engine;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Width in terminal columns of rendered avatars.
pub const AVATAR_COLS: u32 = 16;

/// Payload bytes per escape sequence.
const CHUNK_SIZE: usize = 4096;

/// Image formats the protocol can auto-detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG.
    Png,
    /// JPEG.
    Jpeg,
    /// GIF.
    Gif,
    /// WebP.
    Webp,
}

impl ImageFormat {
    /// Sniff the format from leading magic bytes.
    #[must_use]
    pub const fn detect(data: &[u8]) -> Option<Self> {
        match data {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            _ => None,
        }
    }

    /// MIME type for HTTP responses.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// File extension for saving.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// Check whether the terminal likely supports the Kitty graphics protocol.
///
/// Checks `$TERM`, `$TERM_PROGRAM` and terminal specific variables.
#[must_use]
pub fn is_supported() -> bool {
    let term = std::env::var("TERM").unwrap_or_default();
    let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default().to_lowercase();

    term.contains("kitty")
        || term_program.contains("kitty")
        || term_program.contains("wezterm")
        || term_program.contains("ghostty")
        || std::env::var_os("KITTY_WINDOW_ID").is_some()
        || std::env::var_os("GHOSTTY_RESOURCES_DIR").is_some()
}

/// Escape sequences transmitting and displaying `data` at `cols` columns.
///
/// The base64 payload is split into chunks; every chunk but the last carries
/// `m=1`. Empty input yields an empty string.
#[must_use]
pub fn encode_image(data: &[u8], cols: u32) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(CHUNK_SIZE).collect();
    let last = chunks.len().saturating_sub(1);

    let mut out = String::with_capacity(encoded.len() + chunks.len() * 16);
    for (i, chunk) in chunks.iter().enumerate() {
        let more = u8::from(i != last);
        // base64 output is ASCII
        let chunk = String::from_utf8_lossy(chunk);
        if i == 0 {
            let _ = write!(out, "\x1b_Ga=T,f=100,C=1,c={cols},m={more};{chunk}\x1b\\");
        } else {
            let _ = write!(out, "\x1b_Gm={more};{chunk}\x1b\\");
        }
    }
    out
}

/// Display an image inline at [`AVATAR_COLS`] columns.
///
/// # Errors
///
/// Returns an error if stdout cannot be written to.
pub fn display_image(data: &[u8]) -> io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(encode_image(data, AVATAR_COLS).as_bytes())?;
    writeln!(stdout)?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_formats() {
        assert_eq!(ImageFormat::detect(b"\x89PNG\r\n\x1a\n"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::detect(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::detect(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::detect(b"{\"name\":1}"), None);
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
        assert_eq!(ImageFormat::Webp.mime_type(), "image/webp");
    }

    #[test]
    fn small_images_fit_one_sequence() {
        let out = encode_image(b"\x89PNG", 16);
        assert_eq!(out, "\x1b_Ga=T,f=100,C=1,c=16,m=0;iVBORw==\x1b\\");
    }

    #[test]
    fn large_images_are_chunked() {
        let data = vec![0_u8; CHUNK_SIZE];
        let out = encode_image(&data, 16);
        assert_eq!(out.matches("\x1b_G").count(), 2);
        assert!(out.starts_with("\x1b_Ga=T,f=100,C=1,c=16,m=1;"));
        assert!(out.contains("\x1b_Gm=0;"));
    }

    #[test]
    fn empty_input_encodes_nothing() {
        assert!(encode_image(&[], 16).is_empty());
    }
}
