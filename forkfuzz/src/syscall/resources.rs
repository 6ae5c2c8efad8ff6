use std::{
    ffi::CString,
    fs::{
        self,
        File,
        OpenOptions,
        Permissions,
    },
    os::{
        fd::{
            IntoRawFd,
            RawFd,
        },
        unix::{
            ffi::OsStrExt,
            fs::PermissionsExt,
        },
    },
    path::{
        Path,
        PathBuf,
    },
};

use crate::syscall::args::GenerateError;

const FILES_PER_WORKER: usize = 3;
const FILE_CONTENT: &[u8] = &[b'A'; 4096];

/// Kernel objects a worker owns for the lifetime of its process.
///
/// Descriptors are never closed by this type: the syscalls under test may close or
/// replace them at any time, so they are only released when the worker exits.
pub struct Resources {
    fds: Vec<RawFd>,
    dir: RawFd,
    paths: Vec<CString>,
}

fn prepare_error(path: &Path, source: std::io::Error) -> GenerateError {
    GenerateError::Resources {
        path: path.display().to_string(),
        source,
    }
}

fn to_cstring(path: &Path) -> Result<CString, GenerateError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| GenerateError::NulPath(path.display().to_string()))
}

/// Remove whatever a previous worker left at `path` if it is not of the expected kind
/// and restore usable permissions.
fn restore(path: &Path, want_dir: bool) -> Result<(), GenerateError> {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return Ok(());
    };

    let kind = metadata.file_type();

    if want_dir && kind.is_dir() {
        fs::set_permissions(path, Permissions::from_mode(0o755)).map_err(|err| prepare_error(path, err))
    } else if !want_dir && kind.is_file() {
        fs::set_permissions(path, Permissions::from_mode(0o644)).map_err(|err| prepare_error(path, err))
    } else if kind.is_dir() {
        fs::set_permissions(path, Permissions::from_mode(0o755)).map_err(|err| prepare_error(path, err))?;
        fs::remove_dir_all(path).map_err(|err| prepare_error(path, err))
    } else {
        fs::remove_file(path).map_err(|err| prepare_error(path, err))
    }
}

impl Resources {
    /// Create the scratch objects of the worker in slot `slot` below `scratch`.
    /// Anything left behind by an earlier worker of the same slot is reset.
    pub fn open(scratch: &Path, slot: usize) -> Result<Self, GenerateError> {
        fs::create_dir_all(scratch).map_err(|err| prepare_error(scratch, err))?;
        let scratch = &fs::canonicalize(scratch).map_err(|err| prepare_error(scratch, err))?;

        let mut fds = Vec::new();
        let mut paths = Vec::new();

        for i in 0..FILES_PER_WORKER {
            let path = scratch.join(format!("slot-{}-{}", slot, i));
            restore(&path, false)?;

            let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path).map_err(|err| prepare_error(&path, err))?;
            std::io::Write::write_all(&mut file, FILE_CONTENT).map_err(|err| prepare_error(&path, err))?;

            paths.push(to_cstring(&path)?);
            fds.push(file.into_raw_fd());
        }

        let dir_path = scratch.join(format!("slot-{}-dir", slot));
        restore(&dir_path, true)?;
        fs::create_dir_all(&dir_path).map_err(|err| prepare_error(&dir_path, err))?;
        let dir = File::open(&dir_path).map_err(|err| prepare_error(&dir_path, err))?.into_raw_fd();
        paths.push(to_cstring(&dir_path)?);
        fds.push(dir);

        // Names that do not exist yet, for syscalls that create things
        for suffix in ["new", "link"] {
            let path: PathBuf = scratch.join(format!("slot-{}-{}", slot, suffix));
            restore(&path, false)?;
            let _ = fs::remove_file(&path);
            paths.push(to_cstring(&path)?);
        }

        let null = OpenOptions::new().read(true).write(true).open("/dev/null").map_err(|err| prepare_error(Path::new("/dev/null"), err))?;
        fds.push(null.into_raw_fd());

        let mut pipe = [0; 2];

        if unsafe { libc::pipe(pipe.as_mut_ptr()) } < 0 {
            return Err(prepare_error(Path::new("pipe"), std::io::Error::last_os_error()));
        }

        fds.extend_from_slice(&pipe);

        Ok(Self {
            fds,
            dir,
            paths,
        })
    }

    pub fn descriptors(&self) -> &[RawFd] {
        &self.fds
    }

    /// Descriptor of the worker's scratch directory
    pub fn directory(&self) -> RawFd {
        self.dir
    }

    /// Absolute paths inside the scratch directory
    pub fn paths(&self) -> &[CString] {
        &self.paths
    }
}
