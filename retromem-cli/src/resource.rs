// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

//! Turns image files into [`ImageDescriptor`]s.
//!
//! * `.json`: `{"load": .., "exec": .., "bytes"|"words": [..], "symbols": [..]}`
//! * `.hex`: whitespace-separated hex bytes, `;` starts a comment
//! * anything else: raw bytes (paper tapes, flat binaries)

use std::error::Error;
use std::fs;
use std::path::Path;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use retromem_core::ImageDescriptor;

static HEX_BYTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i:0x)?([0-9A-Fa-f]{1,2})$").unwrap());

pub fn read_image(path: &Path) -> Result<ImageDescriptor, Box<dyn Error>> {
    let contents = fs::read(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let image = parse_image(&ext, &contents)?;
    info!("{}: {} element(s)", path.display(), image.data.len());
    Ok(image)
}

pub fn parse_image(ext: &str, contents: &[u8]) -> Result<ImageDescriptor, Box<dyn Error>> {
    match ext {
        "json" => Ok(serde_json::from_slice(contents)?),
        "hex" => Ok(ImageDescriptor::from_bytes(parse_hex(std::str::from_utf8(contents)?)?)),
        _ => Ok(ImageDescriptor::from_bytes(contents.to_vec())),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.split(';').next().unwrap_or_default();
        for token in line.split_whitespace() {
            let digits = HEX_BYTE
                .captures(token)
                .and_then(|c| c.get(1))
                .ok_or_else(|| format!("line {}: invalid hex byte {:?}", n + 1, token))?;
            bytes.push(u8::from_str_radix(digits.as_str(), 16).map_err(|e| e.to_string())?);
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retromem_core::loader::ImageData;

    #[test]
    fn hex_with_comments() {
        let image = parse_image("hex", b"01 00 0x09 00 ; header\n00 10\n05 06 07 C6\n").unwrap();
        assert_eq!(image.data, ImageData::Bytes(vec![1, 0, 9, 0, 0, 0x10, 5, 6, 7, 0xC6]));
        assert!(parse_image("hex", b"01 0g").is_err());
        assert!(parse_image("hex", b"100").is_err());
    }

    #[test]
    fn json_resource() {
        let image = parse_image("json", br#"{"load": 256, "words": [1, 2]}"#).unwrap();
        assert_eq!(image.load, Some(256));
        assert_eq!(image.data, ImageData::Words(vec![1, 2]));
    }

    #[test]
    fn raw_bytes() {
        let image = parse_image("ptap", &[0, 0, 1, 0]).unwrap();
        assert_eq!(image.data, ImageData::Bytes(vec![0, 0, 1, 0]));
        assert_eq!(image.load, None);
    }
}
