use std::path::{Component, Path, PathBuf};
use std::thread;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use reqwest::blocking::Client as HttpClient;

use crate::errors::ImageFetchError;

pub const GENERAL_MAX_DIM: u32 = 1024;
pub const TRY_ON_MAX_DIM: u32 = 512;
pub const JPEG_QUALITY: u8 = 80;
pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.base64.as_bytes())
    }
}

/// `/`-prefixed references live under the static asset root; anything else is
/// fetched as a remote URL.
pub fn is_local_reference(reference: &str) -> bool {
    reference.starts_with('/')
}

/// Fetches image references and re-encodes them as bounded JPEGs.
///
/// Nothing is cached: every call reads and encodes the source again.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    static_root: PathBuf,
    http: HttpClient,
}

impl ImageNormalizer {
    pub fn new(static_root: impl Into<PathBuf>, http: HttpClient) -> Self {
        Self {
            static_root: static_root.into(),
            http,
        }
    }

    pub fn normalize(
        &self,
        reference: &str,
        max_dim: u32,
    ) -> Result<NormalizedImage, ImageFetchError> {
        let source = self.read_source(reference)?;
        let (bytes, width, height) =
            encode_bounded_jpeg(&source, max_dim).map_err(|source| ImageFetchError::Codec {
                reference: reference.to_string(),
                source,
            })?;
        Ok(NormalizedImage {
            base64: BASE64.encode(bytes),
            width,
            height,
        })
    }

    /// Normalizes every reference concurrently; results keep input order.
    pub fn normalize_all(
        &self,
        references: &[&str],
        max_dim: u32,
    ) -> Vec<Result<NormalizedImage, ImageFetchError>> {
        thread::scope(|scope| {
            let handles = references
                .iter()
                .map(|reference| scope.spawn(move || self.normalize(reference, max_dim)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .zip(references)
                .map(|(handle, reference)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ImageFetchError::Missing {
                            reference: reference.to_string(),
                        })
                    })
                })
                .collect()
        })
    }

    fn read_source(&self, reference: &str) -> Result<Vec<u8>, ImageFetchError> {
        if is_local_reference(reference) {
            let path = self.local_path(reference)?;
            return std::fs::read(&path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ImageFetchError::Missing {
                        reference: reference.to_string(),
                    }
                } else {
                    ImageFetchError::Io {
                        reference: reference.to_string(),
                        source,
                    }
                }
            });
        }

        let transport = |source: reqwest::Error| ImageFetchError::Transport {
            reference: reference.to_string(),
            source,
        };
        let response = self.http.get(reference).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageFetchError::Status {
                reference: reference.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().map_err(transport)?;
        Ok(body.to_vec())
    }

    fn local_path(&self, reference: &str) -> Result<PathBuf, ImageFetchError> {
        let relative = Path::new(reference.trim_start_matches('/'));
        let escapes_root = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes_root || relative.as_os_str().is_empty() {
            return Err(ImageFetchError::Missing {
                reference: reference.to_string(),
            });
        }
        Ok(self.static_root.join(relative))
    }
}

/// Decodes `source`, shrinks it to fit inside `max_dim` x `max_dim` without
/// upscaling, flattens transparency onto white and encodes a JPEG.
pub fn encode_bounded_jpeg(
    source: &[u8],
    max_dim: u32,
) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let decoded = image::load_from_memory(source)?;
    let bounded = if decoded.width() > max_dim || decoded.height() > max_dim {
        decoded.resize(max_dim, max_dim, FilterType::Triangle)
    } else {
        decoded
    };
    let flattened = flatten_onto_white(&bounded);
    let (width, height) = flattened.dimensions();

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder.encode_image(&DynamicImage::ImageRgb8(flattened))?;
    Ok((bytes, width, height))
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::Path;

    use image::{Rgba, RgbaImage};

    use super::*;

    pub(crate) fn write_png(path: &Path, width: u32, height: u32) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut image = RgbaImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgba([200, 40, 90, 255]);
        }
        image.save(path)?;
        Ok(())
    }

    /// Serves exactly one HTTP response with the given status line.
    pub(crate) fn serve_once(status_line: &'static str) -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
            }
        });
        Ok(format!("http://{addr}/shirt.png"))
    }

    fn decoded_dims(image: &NormalizedImage) -> anyhow::Result<(u32, u32)> {
        let bytes = image.decode_bytes()?;
        let decoded = image::load_from_memory(&bytes)?;
        Ok((decoded.width(), decoded.height()))
    }

    #[test]
    fn large_local_image_fits_inside_bound() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("wide.png"), 2000, 1000)?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());

        let out = normalizer.normalize("/wide.png", TRY_ON_MAX_DIM)?;
        assert_eq!((out.width, out.height), (512, 256));
        assert_eq!(decoded_dims(&out)?, (512, 256));

        let general = normalizer.normalize("/wide.png", GENERAL_MAX_DIM)?;
        assert_eq!((general.width, general.height), (1024, 512));
        Ok(())
    }

    #[test]
    fn small_image_is_never_upscaled() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("items").join("tiny.png"), 120, 300)?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());

        let out = normalizer.normalize("/items/tiny.png", GENERAL_MAX_DIM)?;
        assert_eq!(decoded_dims(&out)?, (120, 300));
        Ok(())
    }

    #[test]
    fn output_is_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("a.png"), 64, 64)?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());
        let bytes = normalizer.normalize("/a.png", TRY_ON_MAX_DIM)?.decode_bytes()?;
        assert_eq!(image::guess_format(&bytes)?, image::ImageFormat::Jpeg);
        Ok(())
    }

    #[test]
    fn missing_local_file_reports_reference() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());
        let err = normalizer
            .normalize("/mannequin-male.png", TRY_ON_MAX_DIM)
            .err();
        assert!(matches!(err, Some(ImageFetchError::Missing { .. })));
        assert_eq!(
            err.as_ref().map(ImageFetchError::reference),
            Some("/mannequin-male.png")
        );
        Ok(())
    }

    #[test]
    fn parent_segments_cannot_escape_static_root() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("secret.png"), 8, 8)?;
        let root = temp.path().join("public");
        std::fs::create_dir_all(&root)?;
        let normalizer = ImageNormalizer::new(&root, HttpClient::new());
        assert!(matches!(
            normalizer.normalize("/../secret.png", TRY_ON_MAX_DIM),
            Err(ImageFetchError::Missing { .. })
        ));
        Ok(())
    }

    #[test]
    fn remote_non_success_status_fails_with_status() -> anyhow::Result<()> {
        let url = serve_once("404 Not Found")?;
        let normalizer = ImageNormalizer::new("public", HttpClient::new());
        match normalizer.normalize(&url, TRY_ON_MAX_DIM) {
            Err(ImageFetchError::Status { reference, status }) => {
                assert_eq!(reference, url);
                assert_eq!(status, 404);
            }
            other => panic!("expected status error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn normalize_all_keeps_input_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("a.png"), 10, 20)?;
        write_png(&temp.path().join("c.png"), 30, 40)?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());

        let results = normalizer.normalize_all(&["/a.png", "/b.png", "/c.png"], TRY_ON_MAX_DIM);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().map(|i| i.width).ok(), Some(10));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().map(|i| i.width).ok(), Some(30));
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_a_codec_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("notes.png"), b"not an image")?;
        let normalizer = ImageNormalizer::new(temp.path(), HttpClient::new());
        assert!(matches!(
            normalizer.normalize("/notes.png", TRY_ON_MAX_DIM),
            Err(ImageFetchError::Codec { .. })
        ));
        Ok(())
    }
}
