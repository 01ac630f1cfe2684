use std::io::{self, Read, Seek, SeekFrom, Write};

/// Reads `len` bytes from a store at a specific byte offset.
///
/// # Arguments
///
/// - `store`: A mutable reference to the image to read from.
/// - `offset`: The offset in bytes where reading starts.
/// - `len`: The number of bytes to read.
///
/// # Errors
///
/// Returns an `io::Error` if the range cannot be read entirely.
pub fn read_at<T: Read + Seek>(store: &mut T, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; len];

    store.seek(SeekFrom::Start(offset))?;
    store.read_exact(&mut buffer).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("Failed to read {len} bytes at offset {offset}: {err}"),
        )
    })?;

    Ok(buffer)
}

/// Writes data to a store at a specific offset.
///
/// # Arguments
///
/// - `store`: A mutable reference to the image to write to.
/// - `offset`: The offset in bytes where the data will be written.
/// - `data`: The bytes to write.
pub fn write_at<T: Write + Seek>(store: &mut T, offset: u64, data: &[u8]) -> io::Result<()> {
    store.seek(SeekFrom::Start(offset))?;
    store.write_all(data)
}

/// Extracts a 32-bit unsigned integer from a buffer at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn u32_at(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(
        buffer[offset..offset + 4]
            .try_into()
            .expect("invalid slice"),
    )
}

/// Stores a 32-bit unsigned integer in little-endian order at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn set_u32_at(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Stores a 16-bit unsigned integer in little-endian order at a given offset.
///
/// # Panics
///
/// Panics if the slice does not contain enough bytes starting from the offset.
pub fn set_u16_at(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
