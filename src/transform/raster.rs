use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use super::{FileOutcome, SourceFile, Transform};

/// Ancillary PNG chunks that change how pixels are rendered.
const COLOR_CHUNKS: [&[u8; 4]; 4] = [b"gAMA", b"cHRM", b"sRGB", b"iCCP"];

/// SVG elements whose text content is rendered or parsed.
const TEXT_ELEMENTS: [&[u8]; 7] = [
    b"text", b"tspan", b"textPath", b"style", b"script", b"title", b"desc",
];

/// Lossless image optimisation.
///
/// PNG and GIF are re-encoded at maximum compression from their decoded
/// pixels (palette indices for GIF). SVG loses comments and indentation.
/// Whatever the format, the original bytes are kept whenever the result is
/// not strictly smaller. JPEG and anything unrecognised pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeImage;

impl OptimizeImage {
    fn recompress_png(bytes: &[u8]) -> Result<Vec<u8>, String> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| format!("cannot decode PNG: {}", e))?;

        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
            .write_image(img.as_bytes(), img.width(), img.height(), img.color())
            .map_err(|e| format!("cannot encode PNG: {}", e))?;
        Ok(carry_color_chunks(bytes, out))
    }

    fn recompress_gif(bytes: &[u8]) -> Result<Vec<u8>, String> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options
            .read_info(bytes)
            .map_err(|e| format!("cannot decode GIF: {}", e))?;

        let (width, height) = (decoder.width(), decoder.height());
        let palette = decoder.global_palette().map(<[u8]>::to_vec).unwrap_or_default();
        let mut frames = Vec::new();
        while let Some(frame) = decoder
            .read_next_frame()
            .map_err(|e| format!("cannot decode GIF: {}", e))?
        {
            let mut frame = frame.clone();
            // Decoded rows are already in display order.
            frame.interlaced = false;
            frames.push(frame);
        }
        let repeat = decoder.repeat();

        let mut out = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut out, width, height, &palette)
                .map_err(|e| format!("cannot encode GIF: {}", e))?;
            if !matches!(repeat, gif::Repeat::Finite(0)) {
                encoder
                    .set_repeat(repeat)
                    .map_err(|e| format!("cannot encode GIF: {}", e))?;
            }
            for frame in &frames {
                encoder
                    .write_frame(frame)
                    .map_err(|e| format!("cannot encode GIF: {}", e))?;
            }
        }
        Ok(out)
    }

    fn minify_svg(file: &SourceFile) -> Result<Vec<u8>, String> {
        let mut reader = Reader::from_str(file.text()?);
        let mut writer = Writer::new(Vec::new());
        let mut text_depth = 0usize;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| format!("invalid SVG at byte {}: {}", reader.buffer_position(), e))?;
            match event {
                Event::Eof => break,
                Event::Comment(_) => continue,
                Event::Start(ref start) => {
                    if text_depth > 0 || TEXT_ELEMENTS.contains(&start.local_name().as_ref()) {
                        text_depth += 1;
                    }
                }
                Event::End(_) => text_depth = text_depth.saturating_sub(1),
                Event::Text(ref text)
                    if text_depth == 0 && text.iter().all(u8::is_ascii_whitespace) =>
                {
                    continue
                }
                _ => {}
            }
            writer
                .write_event(event)
                .map_err(|e| format!("cannot write SVG: {}", e))?;
        }
        Ok(writer.into_inner())
    }
}

/// Copy the colour-management chunks of `source` into `encoded`, right after
/// its header chunk. Chunk CRCs cover only type and data, so they move as is.
fn carry_color_chunks(source: &[u8], encoded: Vec<u8>) -> Vec<u8> {
    let carried: Vec<u8> = png_chunks(source)
        .filter(|(kind, _)| COLOR_CHUNKS.contains(kind))
        .flat_map(|(_, raw)| raw.iter().copied())
        .collect();

    // Signature (8) + IHDR length, type, 13 data bytes and CRC.
    const AFTER_IHDR: usize = 8 + 4 + 4 + 13 + 4;
    if carried.is_empty() || encoded.get(12..16) != Some(b"IHDR".as_slice()) {
        return encoded;
    }
    let mut out = Vec::with_capacity(encoded.len() + carried.len());
    out.extend_from_slice(&encoded[..AFTER_IHDR]);
    out.extend_from_slice(&carried);
    out.extend_from_slice(&encoded[AFTER_IHDR..]);
    out
}

/// Iterate `(type, raw chunk bytes)` over a PNG stream. Stops at the first
/// truncated chunk.
fn png_chunks(png: &[u8]) -> impl Iterator<Item = (&[u8; 4], &[u8])> {
    let mut offset = 8;
    std::iter::from_fn(move || {
        let header = png.get(offset..offset + 8)?;
        let len = u32::from_be_bytes(header[..4].try_into().ok()?) as usize;
        let kind: &[u8; 4] = header[4..8].try_into().ok()?;
        let end = offset.checked_add(12 + len)?;
        let raw = png.get(offset..end)?;
        offset = end;
        Some((kind, raw))
    })
}

fn is_svg(file: &SourceFile) -> bool {
    file.path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"))
}

impl Transform for OptimizeImage {
    fn name(&self) -> &'static str {
        "optimize-image"
    }

    fn apply(&self, file: SourceFile) -> FileOutcome {
        let optimized = if is_svg(&file) {
            Self::minify_svg(&file)
        } else {
            match image::guess_format(&file.contents) {
                Ok(ImageFormat::Png) => Self::recompress_png(&file.contents),
                Ok(ImageFormat::Gif) => Self::recompress_gif(&file.contents),
                _ => return FileOutcome::Emit(file),
            }
        };

        match optimized {
            Ok(smaller) if smaller.len() < file.contents.len() => {
                FileOutcome::Emit(SourceFile::new(file.path, smaller))
            }
            Ok(_) => FileOutcome::Emit(file),
            Err(message) => FileOutcome::Failed(message),
        }
    }
}
