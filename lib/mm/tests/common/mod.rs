//! A fake filesystem for the end-to-end scenarios, registered once for
//! this test binary. Kept separate from the unit tests' `test_support`
//! module, which is compiled only for `mm`'s own `#[cfg(test)]` build and
//! isn't visible from here.

use crate_interface::impl_interface;
use mutex::SpinNoIrqLock;
use systype::{
    SysResult,
    fs::{FileBackedOps, InodeRef},
};

const MAX_FILES: usize = 4;
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

pub fn seed(ino: InodeRef, bytes: &[u8]) {
    let mut fs = FS.lock();
    let file = &mut fs.files[ino];
    file.data[..bytes.len()].copy_from_slice(bytes);
    file.len = file.len.max(bytes.len());
}

pub fn read_back(ino: InodeRef, offset: usize, len: usize) -> Vec<u8> {
    let fs = FS.lock();
    fs.files[ino].data[offset..offset + len].to_vec()
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
