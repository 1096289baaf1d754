//! Image dataset abstraction.
//!
//! The simulation core never depends on a particular viewer or storage
//! backend; it only needs the capability set expressed by [`ImageStack`]:
//! append a 2-D pixel grid, concatenate another dataset, serialize the whole
//! stack to TIFF bytes, and expose basic geometry. Backends are selected at
//! construction time. [`InMemoryStack`] is the default implementation and the
//! only one this crate ships; file-backed or GUI-bound implementations plug
//! in behind the same trait.
//!
//! Frames are stored in their native unsigned-integer format (u16 words,
//! clipped to the declared bit depth) rather than as floats, which keeps a
//! 2048x2048 frame at 8 MB instead of 32 MB.

use std::io::Cursor;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tiff::encoder::{colortype, TiffEncoder};

use crate::error::{SimResult, SimulationError};

/// Declared bit depth of the digital camera output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Largest representable pixel value.
    pub fn max_value(self) -> u16 {
        match self {
            BitDepth::Eight => u8::MAX as u16,
            BitDepth::Sixteen => u16::MAX,
        }
    }

    /// Bits per pixel.
    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }
}

/// An ordered, append-only stack of equally sized 2-D frames plus metadata.
///
/// All mutating operations leave the dataset untouched on error.
pub trait ImageStack: Send {
    /// Title (name) of the dataset.
    fn title(&self) -> &str;

    /// Renames the dataset.
    fn set_title(&mut self, title: String);

    /// Bit depth of the pixels.
    fn bit_depth(&self) -> BitDepth;

    /// Width of the frames in pixels.
    fn width(&self) -> usize;

    /// Height of the frames in pixels.
    fn height(&self) -> usize;

    /// Number of frames in the dataset.
    fn len(&self) -> usize;

    /// Whether the dataset holds no frames yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a single frame. Fails with
    /// [`SimulationError::ImageShape`] if the dimensions do not match.
    fn append(&mut self, frame: Array2<u16>) -> SimResult<()>;

    /// Returns the frame at `index`, if present.
    fn frame(&self, index: usize) -> Option<&Array2<u16>>;

    /// Appends every frame of `other` to this dataset. Fails with
    /// [`SimulationError::ImageShape`] if the widths or heights differ;
    /// this dataset is left unmodified in that case.
    fn concatenate(&mut self, other: &dyn ImageStack) -> SimResult<()>;

    /// Active slice index (0-based).
    fn slice(&self) -> usize;

    /// Sets the active slice index. Fails with
    /// [`SimulationError::InvalidSlice`] when out of range.
    fn set_slice(&mut self, index: usize) -> SimResult<()>;

    /// Serializes the full stack into a multi-page TIFF byte array.
    fn serialize_to_bytes(&self) -> SimResult<Vec<u8>>;
}

/// Heap-backed [`ImageStack`] implementation.
#[derive(Debug, Clone)]
pub struct InMemoryStack {
    title: String,
    width: usize,
    height: usize,
    bit_depth: BitDepth,
    frames: Vec<Array2<u16>>,
    active_slice: usize,
}

impl InMemoryStack {
    pub fn new(title: impl Into<String>, width: usize, height: usize, bit_depth: BitDepth) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            bit_depth,
            frames: Vec::new(),
            active_slice: 0,
        }
    }

    fn check_shape(&self, frame: &Array2<u16>) -> SimResult<()> {
        let (h, w) = frame.dim();
        if w != self.width || h != self.height {
            return Err(SimulationError::ImageShape {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: w,
                actual_height: h,
            });
        }
        Ok(())
    }
}

impl ImageStack for InMemoryStack {
    fn title(&self) -> &str {
        &self.title
    }

    fn set_title(&mut self, title: String) {
        self.title = title;
    }

    fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn append(&mut self, frame: Array2<u16>) -> SimResult<()> {
        self.check_shape(&frame)?;
        self.frames.push(frame);
        Ok(())
    }

    fn frame(&self, index: usize) -> Option<&Array2<u16>> {
        self.frames.get(index)
    }

    fn concatenate(&mut self, other: &dyn ImageStack) -> SimResult<()> {
        if other.width() != self.width || other.height() != self.height {
            return Err(SimulationError::ImageShape {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width(),
                actual_height: other.height(),
            });
        }
        for index in 0..other.len() {
            if let Some(frame) = other.frame(index) {
                self.frames.push(frame.clone());
            }
        }
        Ok(())
    }

    fn slice(&self) -> usize {
        self.active_slice
    }

    fn set_slice(&mut self, index: usize) -> SimResult<()> {
        if index >= self.frames.len() {
            return Err(SimulationError::InvalidSlice {
                index,
                len: self.frames.len(),
            });
        }
        self.active_slice = index;
        Ok(())
    }

    fn serialize_to_bytes(&self) -> SimResult<Vec<u8>> {
        encode_tiff(&self.frames, self.bit_depth)
    }
}

/// Encodes a sequence of frames as a multi-page TIFF byte array.
pub fn encode_tiff(frames: &[Array2<u16>], bit_depth: BitDepth) -> SimResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        for frame in frames {
            let (height, width) = frame.dim();
            match bit_depth {
                BitDepth::Eight => {
                    let data: Vec<u8> = frame.iter().map(|&v| v.min(255) as u8).collect();
                    encoder.write_image::<colortype::Gray8>(width as u32, height as u32, &data)?;
                }
                BitDepth::Sixteen => {
                    let data: Vec<u16> = frame.iter().copied().collect();
                    encoder.write_image::<colortype::Gray16>(width as u32, height as u32, &data)?;
                }
            }
        }
    }
    Ok(cursor.into_inner())
}

/// Encodes a single frame as a TIFF byte array.
pub fn encode_frame_tiff(frame: &Array2<u16>, bit_depth: BitDepth) -> SimResult<Vec<u8>> {
    encode_tiff(std::slice::from_ref(frame), bit_depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_32() -> InMemoryStack {
        InMemoryStack::new("test", 32, 32, BitDepth::Sixteen)
    }

    #[test]
    fn test_append_and_count() {
        let mut stack = stack_32();
        assert!(stack.is_empty());
        stack.append(Array2::zeros((32, 32))).expect("append");
        stack.append(Array2::zeros((32, 32))).expect("append");
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_title_rename_round_trip() {
        let mut stack = stack_32();
        assert_eq!(stack.title(), "test");
        stack.set_title("acquisition 1".to_string());
        assert_eq!(stack.title(), "acquisition 1");
    }

    #[test]
    fn test_append_shape_mismatch_leaves_stack_unmodified() {
        let mut stack = stack_32();
        let result = stack.append(Array2::zeros((64, 64)));
        assert!(matches!(result, Err(SimulationError::ImageShape { .. })));
        assert_eq!(stack.len(), 0);
    }

    #[test]
    fn test_concatenate() {
        let mut a = stack_32();
        a.append(Array2::zeros((32, 32))).expect("append");
        let mut b = stack_32();
        b.append(Array2::from_elem((32, 32), 5u16)).expect("append");
        b.append(Array2::from_elem((32, 32), 9u16)).expect("append");

        a.concatenate(&b).expect("concatenate");
        assert_eq!(a.len(), 3);
        assert_eq!(a.frame(2).expect("frame")[[0, 0]], 9);
    }

    #[test]
    fn test_concatenate_shape_mismatch() {
        let mut a = stack_32();
        a.append(Array2::zeros((32, 32))).expect("append");
        let b = InMemoryStack::new("other", 64, 64, BitDepth::Sixteen);
        assert!(a.concatenate(&b).is_err());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_slice_cursor() {
        let mut stack = stack_32();
        stack.append(Array2::zeros((32, 32))).expect("append");
        stack.append(Array2::zeros((32, 32))).expect("append");
        stack.set_slice(1).expect("set slice");
        assert_eq!(stack.slice(), 1);
        assert!(matches!(
            stack.set_slice(2),
            Err(SimulationError::InvalidSlice { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_tiff_serialization_little_endian_header() {
        let mut stack = stack_32();
        stack
            .append(Array2::from_elem((32, 32), 1234u16))
            .expect("append");
        let bytes = stack.serialize_to_bytes().expect("serialize");
        // Little-endian TIFF magic: "II" then 42.
        assert_eq!(&bytes[0..4], &[0x49, 0x49, 0x2A, 0x00]);
        assert!(bytes.len() > 32 * 32 * 2);
    }

    #[test]
    fn test_single_frame_encoding_is_deterministic() {
        let frame = Array2::from_shape_fn((16, 16), |(y, x)| (y * 16 + x) as u16);
        let a = encode_frame_tiff(&frame, BitDepth::Sixteen).expect("encode");
        let b = encode_frame_tiff(&frame, BitDepth::Sixteen).expect("encode");
        assert_eq!(a, b);
    }
}
