//! First-page image extraction using lopdf.

use std::fmt;
use std::io::Cursor;

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::Result;
use crate::error::PdfError;

/// Maximum depth when walking the page tree for inherited resources.
const MAX_TREE_DEPTH: usize = 32;

/// Encoding of an extracted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    /// Raw DCTDecode stream.
    Jpeg,
    /// Raw samples re-encoded as PNG.
    Png,
}

impl ImageEncoding {
    /// File extension used for uploads.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "jpg",
            ImageEncoding::Png => "png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// An image extracted from a PDF.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Encoding of `data`.
    pub encoding: ImageEncoding,
}

impl ExtractedImage {
    pub fn extension(&self) -> &'static str {
        self.encoding.extension()
    }

    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }
}

impl fmt::Debug for ExtractedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedImage")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Extracts the first embedded image of a document's first page.
///
/// Only page 1 is inspected: intake documents are single-image receipt scans,
/// and an image on a later page is not treated as the receipt.
#[derive(Debug, Clone)]
pub struct ImageExtractor {
    max_form_depth: usize,
}

impl ImageExtractor {
    /// Create a new image extractor.
    pub fn new() -> Self {
        Self { max_form_depth: 4 }
    }

    /// Set how deep nested Form XObjects are searched.
    pub fn with_max_form_depth(mut self, depth: usize) -> Self {
        self.max_form_depth = depth;
        self
    }

    /// Extract the first image of the first page.
    pub fn extract(&self, data: &[u8]) -> Result<ExtractedImage> {
        let doc = load_document(data)?;

        let pages = doc.get_pages();
        let (_, first_page) = pages.iter().next().ok_or(PdfError::NoPages)?;
        debug!("Loaded PDF with {} pages, inspecting page 1", pages.len());

        let resources = page_resources(&doc, *first_page).ok_or(PdfError::NoImageFound)?;

        match self.first_image(&doc, resources, 0) {
            Some(image) => {
                debug!(
                    "Extracted {} image {}x{} ({} bytes)",
                    image.encoding,
                    image.width,
                    image.height,
                    image.data.len()
                );
                Ok(image)
            }
            None => Err(PdfError::NoImageFound),
        }
    }

    fn first_image(
        &self,
        doc: &Document,
        resources: &Dictionary,
        depth: usize,
    ) -> Option<ExtractedImage> {
        let xobjects = resources.get(b"XObject").ok()?;
        let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
            return None;
        };

        for (name, obj_ref) in xobjects.iter() {
            let Ok((_, Object::Stream(stream))) = doc.dereference(obj_ref) else {
                continue;
            };

            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => {
                    trace!("Inspecting image XObject {}", String::from_utf8_lossy(name));
                    if let Some(image) = decode_image(doc, stream) {
                        return Some(image);
                    }
                }
                Ok(b"Form") if depth < self.max_form_depth => {
                    let nested = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|r| doc.dereference(r).ok())
                        .and_then(|(_, o)| o.as_dict().ok());

                    if let Some(nested) = nested {
                        if let Some(image) = self.first_image(doc, nested, depth + 1) {
                            return Some(image);
                        }
                    }
                }
                _ => trace!("Skipping XObject {}", String::from_utf8_lossy(name)),
            }
        }

        None
    }
}

impl Default for ImageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn load_document(data: &[u8]) -> Result<Document> {
    let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

    // Handle PDFs with empty password encryption
    if doc.is_encrypted() {
        if doc.decrypt("").is_err() {
            return Err(PdfError::Encrypted);
        }
        debug!("Decrypted PDF with empty password");
    }

    Ok(doc)
}

/// Resources dictionary for a page, following Parent inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node_id = page_id;

    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(node_id).ok()?;

        if let Ok(resources) = node.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res_dict))) = doc.dereference(resources) {
                return Some(res_dict);
            }
        }

        node_id = node.get(b"Parent").ok()?.as_reference().ok()?;
    }

    None
}

fn filter_names(dict: &Dictionary) -> Vec<&[u8]> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(arr)) => arr.iter().filter_map(|o| o.as_name().ok()).collect(),
        _ => Vec::new(),
    }
}

fn decode_image(doc: &Document, stream: &Stream) -> Option<ExtractedImage> {
    let dict = &stream.dict;

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;

    trace!("Found image object: {}x{}", width, height);

    let filters = filter_names(dict);
    match filters.as_slice() {
        [b"DCTDecode"] => {
            // JPEG data is kept as-is
            return Some(ExtractedImage {
                data: stream.content.clone(),
                width,
                height,
                encoding: ImageEncoding::Jpeg,
            });
        }
        [.., b"JPXDecode" | b"CCITTFaxDecode" | b"JBIG2Decode" | b"DCTDecode"] => {
            trace!("Unsupported image filter chain: {:?}", filters);
            return None;
        }
        _ => {}
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    let samples = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let image = raw_to_image(samples, width, height, color_components(doc, dict)?)?;

    let mut data = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
        .ok()?;

    Some(ExtractedImage {
        data,
        width,
        height,
        encoding: ImageEncoding::Png,
    })
}

/// Number of color components for supported color spaces (1 or 3).
fn color_components(doc: &Document, dict: &Dictionary) -> Option<usize> {
    let color_space = match dict.get(b"ColorSpace") {
        Ok(obj) => doc.dereference(obj).ok()?.1,
        Err(_) => return Some(3),
    };

    match color_space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(3),
            b"DeviceGray" | b"G" | b"CalGray" => Some(1),
            other => {
                trace!("Unsupported color space: {}", String::from_utf8_lossy(other));
                None
            }
        },
        Object::Array(arr) => match arr.first().and_then(|o| o.as_name().ok()) {
            Some(b"ICCBased") => {
                let profile = arr.get(1).and_then(|o| doc.dereference(o).ok())?.1;
                let n = profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()?;
                match n {
                    1 => Some(1),
                    3 => Some(3),
                    _ => None,
                }
            }
            Some(b"CalRGB") => Some(3),
            Some(b"CalGray") => Some(1),
            _ => None,
        },
        _ => None,
    }
}

fn raw_to_image(
    mut samples: Vec<u8>,
    width: u32,
    height: u32,
    components: usize,
) -> Option<DynamicImage> {
    let expected = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(components)?;

    if samples.len() < expected {
        trace!(
            "Could not decode image: data_len={}, expected={}",
            samples.len(),
            expected
        );
        return None;
    }
    samples.truncate(expected);

    match components {
        1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        _ => None,
    }
}
