use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

use flate2::read::MultiGzDecoder;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Wraps a reader with gzip decompression if its leading bytes carry the gzip
/// magic, and passes it through untouched otherwise.
pub fn auto_decompress<R: Read + 'static>(reader: R) -> io::Result<Box<dyn Read>> {
    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf()?;
    if head.len() >= 2 && head[..2] == GZIP_MAGIC {
        return Ok(Box::new(MultiGzDecoder::new(buffered)));
    }
    Ok(Box::new(buffered))
}

/// Whether the file at `path` can be read like a (possibly gzip-compressed)
/// tarball. Any error along the way simply means "no".
pub fn is_archive_path(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let Ok(reader) = auto_decompress(file) else {
        return false;
    };
    let mut archive = tar::Archive::new(reader);
    match archive.entries() {
        Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
        Err(_) => false,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
