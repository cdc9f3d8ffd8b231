//! Bounded read-only views over a local upload source
//!
//! A [`SharedSource`] opens the payload once; every part is read through its
//! own [`FragmentView`], which keeps a private cursor and re-positions the
//! shared handle before each read. Views never hold more than one read
//! buffer of the source in memory.

use bytes::Bytes;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// A seekable source shared between fragment views
pub struct SharedSource<S> {
    inner: Arc<Mutex<S>>,
    len: u64,
}

impl<S> Clone for SharedSource<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            len: self.len,
        }
    }
}

impl SharedSource<File> {
    /// Open a local file as an upload source
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<S: Read + Seek> SharedSource<S> {
    /// Wrap a source, measuring its length once
    pub fn new(mut source: S) -> io::Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(source)),
            len,
        })
    }

    /// Length of the source when it was opened
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the source is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View `length` bytes from `offset`, clamped to the end of the source
    pub fn fragment(&self, offset: u64, length: u64) -> FragmentView<S> {
        let offset = offset.min(self.len);
        let len = length.min(self.len - offset);
        FragmentView {
            source: Arc::clone(&self.inner),
            offset,
            len,
            pos: 0,
        }
    }

    /// View over the whole source
    pub fn full(&self) -> FragmentView<S> {
        self.fragment(0, self.len)
    }
}

/// Read-only window over `[offset, offset + len)` of a shared source
pub struct FragmentView<S> {
    source: Arc<Mutex<S>>,
    offset: u64,
    len: u64,
    pos: u64,
}

impl<S: Read + Seek> FragmentView<S> {
    /// Start of the window in the source
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes the view yields
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the view yields no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the whole window into a buffer, starting from the beginning
    pub fn to_bytes(&mut self) -> io::Result<Bytes> {
        self.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.len as usize);
        self.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Hex MD5 of the window
    pub fn md5_hex(&mut self) -> io::Result<String> {
        self.seek(SeekFrom::Start(0))?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

impl<S: Read + Seek> Read for FragmentView<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min((self.len - self.pos) as usize);
        let mut source = self
            .source
            .lock()
            .map_err(|_| io::Error::other("upload source lock poisoned"))?;
        source.seek(SeekFrom::Start(self.offset + self.pos))?;
        let n = source.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S> Seek for FragmentView<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };

        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of fragment",
            )),
        }
    }
}

/// Hex MD5 of a byte slice
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
