//! A tiny in-memory stand-in for the filesystem layer, registered as the
//! `FileBackedOps` implementation for every test in this crate. Real
//! inode numbers and on-disk layout are out of scope; this only needs to
//! round-trip bytes the way `readi`/`writei` would.

use crate_interface::impl_interface;
use mutex::SpinNoIrqLock;
use systype::{
    SysResult,
    fs::{FileBackedOps, InodeRef},
};

const MAX_FILES: usize = 8;
const MAX_FILE_BYTES: usize = 16 * 1024;

struct FakeFile {
    data: [u8; MAX_FILE_BYTES],
    len: usize,
}

struct FakeFs {
    files: [FakeFile; MAX_FILES],
}

static FS: SpinNoIrqLock<FakeFs> = SpinNoIrqLock::new(FakeFs {
    files: [const {
        FakeFile {
            data: [0; MAX_FILE_BYTES],
            len: 0,
        }
    }; MAX_FILES],
});

/// Seeds inode `ino`'s contents for a test. Overwrites whatever was
/// there before.
pub fn seed(ino: InodeRef, bytes: &[u8]) {
    let mut fs = FS.lock();
    let file = &mut fs.files[ino];
    file.data[..bytes.len()].copy_from_slice(bytes);
    file.len = bytes.len();
}

/// Reads back everything written to inode `ino` so far, for assertions.
pub fn contents(ino: InodeRef) -> ([u8; MAX_FILE_BYTES], usize) {
    let fs = FS.lock();
    (fs.files[ino].data, fs.files[ino].len)
}

pub struct Fake;

#[impl_interface]
impl FileBackedOps for Fake {
    fn begin_op() {}
    fn end_op() {}

    fn idup(ino: InodeRef) -> InodeRef {
        ino
    }

    fn iput(_ino: InodeRef) {}
    fn ilock(_ino: InodeRef) {}
    fn iunlock(_ino: InodeRef) {}

    fn readi(ino: InodeRef, dst: &mut [u8], offset: usize) -> SysResult<usize> {
        let fs = FS.lock();
        let file = &fs.files[ino];
        if offset >= file.len {
            return Ok(0);
        }
        let n = dst.len().min(file.len - offset);
        dst[..n].copy_from_slice(&file.data[offset..offset + n]);
        Ok(n)
    }

    fn writei(ino: InodeRef, src: &[u8], offset: usize) -> SysResult<usize> {
        let mut fs = FS.lock();
        let file = &mut fs.files[ino];
        file.data[offset..offset + src.len()].copy_from_slice(src);
        file.len = file.len.max(offset + src.len());
        Ok(src.len())
    }
}
