//! Minimal NRRD reader/writer for the 2-D 8-bit volumes handed to the
//! radiomics extractor.

use std::fs;
use std::path::Path;

use image::GrayImage;

use crate::errors::{PwatError, Result};

const MAGIC: &str = "NRRD0004";

/// Writes `image` as a raw, 2-D `uint8` NRRD file. The fastest axis is x.
pub fn write_nrrd(path: &Path, image: &GrayImage) -> Result<()> {
    let (width, height) = image.dimensions();
    let header = format!(
        "{MAGIC}\n\
         # Complete NRRD file format specification at:\n\
         # http://teem.sourceforge.net/nrrd/format.html\n\
         type: uint8\n\
         dimension: 2\n\
         sizes: {width} {height}\n\
         encoding: raw\n\n"
    );

    let mut bytes = header.into_bytes();
    bytes.extend_from_slice(image.as_raw());
    fs::write(path, bytes).map_err(|source| PwatError::FileSystem {
        path: path.to_path_buf(),
        operation: "NRRD write".to_string(),
        source,
    })
}

/// Reads a file produced by [`write_nrrd`] (or any raw 2-D `uint8` NRRD).
pub fn read_nrrd(path: &Path) -> Result<GrayImage> {
    let bytes = fs::read(path).map_err(|source| PwatError::FileSystem {
        path: path.to_path_buf(),
        operation: "NRRD read".to_string(),
        source,
    })?;
    let malformed = |reason: &str| {
        PwatError::extraction(format!("{}: malformed NRRD ({reason})", path.display()))
    };

    let header_end = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| malformed("no header terminator"))?;
    let header =
        std::str::from_utf8(&bytes[..header_end]).map_err(|_| malformed("header is not UTF-8"))?;
    let data = &bytes[header_end + 2..];

    let mut lines = header.lines();
    if !lines.next().is_some_and(|magic| magic.starts_with("NRRD000")) {
        return Err(malformed("missing magic"));
    }

    let (mut sizes, mut dimension, mut kind, mut encoding) = (None, None, None, None);
    for line in lines.filter(|l| !l.starts_with('#')) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // `key:=value` lines are key/value pairs, not fields
        if value.starts_with('=') {
            continue;
        }
        let value = value.trim();
        match key.trim() {
            "sizes" => {
                sizes = Some(
                    value
                        .split_whitespace()
                        .map(str::parse::<u32>)
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|_| malformed("bad sizes"))?,
                )
            }
            "dimension" => dimension = value.parse::<usize>().ok(),
            "type" => kind = Some(value.to_string()),
            "encoding" => encoding = Some(value.to_string()),
            _ => {}
        }
    }

    if dimension != Some(2) {
        return Err(malformed("only 2-D volumes are supported"));
    }
    if !matches!(
        kind.as_deref(),
        Some("uint8" | "uchar" | "unsigned char" | "uint8_t")
    ) {
        return Err(malformed("only uint8 data is supported"));
    }
    if encoding.as_deref() != Some("raw") {
        return Err(malformed("only raw encoding is supported"));
    }
    let [width, height] = sizes
        .as_deref()
        .and_then(|s| <[u32; 2]>::try_from(s).ok())
        .ok_or_else(|| malformed("sizes must list two axes"))?;

    GrayImage::from_raw(width, height, data.to_vec())
        .ok_or_else(|| malformed("data length does not match sizes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::TempDir;

    #[test]
    fn header_describes_raw_uint8_plane() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("wound.nrrd");
        write_nrrd(&path, &GrayImage::from_pixel(3, 2, Luma([7])))?;

        let bytes = fs::read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("NRRD0004\n"));
        assert!(text.contains("sizes: 3 2\n"));
        assert!(text.contains("encoding: raw\n"));
        assert!(bytes.ends_with(&[7; 6]));
        Ok(())
    }

    #[test]
    fn reads_back_pixels_in_order() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("mask.nrrd");
        let image = GrayImage::from_fn(4, 3, |x, y| Luma([(x + 10 * y) as u8]));
        write_nrrd(&path, &image)?;

        assert_eq!(read_nrrd(&path)?, image);
        Ok(())
    }

    #[test]
    fn rejects_truncated_data() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("short.nrrd");
        fs::write(
            &path,
            b"NRRD0004\ntype: uint8\ndimension: 2\nsizes: 4 4\nencoding: raw\n\n\x01\x02",
        )?;
        assert!(matches!(
            read_nrrd(&path),
            Err(PwatError::FeatureExtraction { .. })
        ));
        Ok(())
    }
}
