//! Firmware image loading.
//!
//! An image is a raw binary: one info block followed by the firmware body.
//! On disk the 16-bit words are stored with the high byte first; the image
//! keeps them byte-swapped into wire order once, at load time.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::device::registers::{DATA_BLOCK_REGISTERS, INFO_BLOCK_REGISTERS};
use crate::error::{Error, Result};

/// Info block size in bytes.
pub const INFO_BLOCK_SIZE: usize = INFO_BLOCK_REGISTERS as usize * 2;

/// Data block size in bytes.
pub const DATA_BLOCK_SIZE: usize = DATA_BLOCK_REGISTERS as usize * 2;

/// Fill value for the unused tail of the last data block (erased flash).
pub const PAD_BYTE: u8 = 0xFF;

/// Swap the two bytes of every 16-bit word in place.
///
/// A trailing odd byte is left alone.
pub fn swap_byte_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// One data block ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Zero-based block index.
    pub index: usize,
    /// Byte offset of the block in the image.
    pub offset: usize,
    /// Register values, always [`DATA_BLOCK_REGISTERS`] long.
    pub words: Vec<u16>,
}

/// Firmware image held in wire byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let load_error = |e: std::io::Error| Error::ImageLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let file = File::open(path).map_err(load_error)?;
        let mut reader = BufReader::new(file);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(load_error)?;

        debug!("{} opened successfully, size {} bytes", path.display(), data.len());
        Self::from_bytes(data)
    }

    /// Build an image from the on-disk representation.
    pub fn from_bytes(mut data: Vec<u8>) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(Error::InvalidImage(format!(
                "Size {} bytes is not a whole number of registers",
                data.len()
            )));
        }
        if data.len() < INFO_BLOCK_SIZE {
            return Err(Error::InvalidImage(format!(
                "Size {} bytes is smaller than the info block ({INFO_BLOCK_SIZE} bytes)",
                data.len()
            )));
        }
        swap_byte_pairs(&mut data);
        Ok(Self { data })
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty. Never true for a loaded image.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image bytes in wire order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Info block register values.
    pub fn info_block(&self) -> Vec<u16> {
        words(&self.data[..INFO_BLOCK_SIZE])
    }

    /// Firmware body size in bytes.
    pub fn body_len(&self) -> usize {
        self.data.len() - INFO_BLOCK_SIZE
    }

    /// Number of data blocks needed to cover the body.
    pub fn data_block_count(&self) -> usize {
        self.body_len().div_ceil(DATA_BLOCK_SIZE)
    }

    /// Data block at `index`, padded with [`PAD_BYTE`] if it runs past the
    /// end of the image.
    pub fn data_block(&self, index: usize) -> Option<DataBlock> {
        let offset = INFO_BLOCK_SIZE + index.checked_mul(DATA_BLOCK_SIZE)?;
        if offset >= self.data.len() {
            return None;
        }
        let end = (offset + DATA_BLOCK_SIZE).min(self.data.len());
        let mut bytes = self.data[offset..end].to_vec();
        bytes.resize(DATA_BLOCK_SIZE, PAD_BYTE);
        Some(DataBlock {
            index,
            offset,
            words: words(&bytes),
        })
    }

    /// All data blocks in offset order.
    pub fn data_blocks(&self) -> impl Iterator<Item = DataBlock> + '_ {
        (0..self.data_block_count()).filter_map(|index| self.data_block(index))
    }
}

fn words(bytes: &[u8]) -> Vec<u16> {
    let mut words = vec![0u16; bytes.len() / 2];
    LittleEndian::read_u16_into(bytes, &mut words);
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_swap_twice_is_identity() {
        for len in [0, 1, 2, 7, 32, 168, 301] {
            let original = raw(len);
            let mut buf = original.clone();
            swap_byte_pairs(&mut buf);
            swap_byte_pairs(&mut buf);
            assert_eq!(buf, original);
        }
    }

    #[test]
    fn test_swap_pairs() {
        let mut buf = vec![0x12, 0x34, 0x56, 0x78, 0x9A];
        swap_byte_pairs(&mut buf);
        assert_eq!(buf, vec![0x34, 0x12, 0x78, 0x56, 0x9A]);
    }

    #[test]
    fn test_words_are_high_byte_first_on_disk() {
        let mut data = vec![0u8; INFO_BLOCK_SIZE];
        data[0] = 0x12;
        data[1] = 0x34;
        let image = FirmwareImage::from_bytes(data).unwrap();
        assert_eq!(image.info_block()[0], 0x1234);
        assert_eq!(image.as_bytes()[..2], [0x34, 0x12]);
        assert_eq!(image.info_block().len(), usize::from(INFO_BLOCK_REGISTERS));
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = FirmwareImage::from_bytes(raw(INFO_BLOCK_SIZE + 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_shorter_than_info_block_rejected() {
        let err = FirmwareImage::from_bytes(raw(INFO_BLOCK_SIZE - 2)).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_info_block_only() {
        let image = FirmwareImage::from_bytes(raw(INFO_BLOCK_SIZE)).unwrap();
        assert_eq!(image.data_block_count(), 0);
        assert!(image.data_block(0).is_none());
    }

    #[test]
    fn test_block_count_and_offsets() {
        let cases = [
            (2, 1),
            (DATA_BLOCK_SIZE, 1),
            (DATA_BLOCK_SIZE + 2, 2),
            (DATA_BLOCK_SIZE * 5, 5),
        ];
        for (body, expected) in cases {
            let image = FirmwareImage::from_bytes(raw(INFO_BLOCK_SIZE + body)).unwrap();
            assert_eq!(image.data_block_count(), expected);

            let offsets: Vec<usize> = image.data_blocks().map(|b| b.offset).collect();
            let expected_offsets: Vec<usize> = (0..expected)
                .map(|i| INFO_BLOCK_SIZE + i * DATA_BLOCK_SIZE)
                .collect();
            assert_eq!(offsets, expected_offsets);
        }
    }

    #[test]
    fn test_last_block_is_padded() {
        let image = FirmwareImage::from_bytes(raw(INFO_BLOCK_SIZE + DATA_BLOCK_SIZE + 4)).unwrap();
        let last = image.data_block(1).unwrap();
        assert_eq!(last.words.len(), usize::from(DATA_BLOCK_REGISTERS));
        assert_ne!(last.words[0], 0xFFFF);
        assert_ne!(last.words[1], 0xFFFF);
        assert!(last.words[2..].iter().all(|w| *w == 0xFFFF));
    }

    #[test]
    fn test_blocks_cover_body_exactly_once() {
        let original = raw(INFO_BLOCK_SIZE + DATA_BLOCK_SIZE * 3);
        let image = FirmwareImage::from_bytes(original.clone()).unwrap();

        let mut rebuilt: Vec<u16> = image.info_block();
        for block in image.data_blocks() {
            rebuilt.extend(block.words);
        }
        let expected: Vec<u16> = original
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&raw(INFO_BLOCK_SIZE + 10)).unwrap();
        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.len(), INFO_BLOCK_SIZE + 10);
        assert_eq!(image.data_block_count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = FirmwareImage::from_file("/nonexistent/firmware.bin").unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }
}
