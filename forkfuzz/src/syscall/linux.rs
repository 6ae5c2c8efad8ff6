//! Syscalls fuzzed on Linux.
//!
//! Only syscalls whose side effects stay inside the worker process or its scratch
//! directory are listed. `mmap` is left out because every successful call leaks a mapping.

use crate::syscall::{
    args::ArgType::*,
    entry::SyscallEntry,
};

pub static TABLE: &[SyscallEntry] = &[
    /* File I/O */
    // `ssize_t read(int fd, void *buf, size_t count);`
    SyscallEntry::new("read", libc::SYS_read, &[FileDesc, VoidBuf, Size]).alarm(),
    // `ssize_t write(int fd, const void *buf, size_t count);`
    SyscallEntry::new("write", libc::SYS_write, &[FileDesc, VoidBuf, Size]).alarm(),
    // `int openat(int dirfd, const char *pathname, int flags, mode_t mode);`
    SyscallEntry::new("openat", libc::SYS_openat, &[DirFd, FilePath, OpenFlag, Mode]),
    // `int close(int fd);`
    SyscallEntry::new("close", libc::SYS_close, &[FileDesc]),
    // `off_t lseek(int fd, off_t offset, int whence);`
    SyscallEntry::new("lseek", libc::SYS_lseek, &[FileDesc, Offset, Whence]),
    // `int fstat(int fd, struct stat *statbuf);`
    SyscallEntry::new("fstat", libc::SYS_fstat, &[FileDesc, StatBuf]),
    // `ssize_t pread64(int fd, void *buf, size_t count, off_t offset);`
    SyscallEntry::new("pread64", libc::SYS_pread64, &[FileDesc, VoidBuf, Size, Offset]).alarm(),
    // `ssize_t pwrite64(int fd, const void *buf, size_t count, off_t offset);`
    SyscallEntry::new("pwrite64", libc::SYS_pwrite64, &[FileDesc, VoidBuf, Size, Offset]).alarm(),
    // `int ftruncate(int fd, off_t length);`
    SyscallEntry::new("ftruncate", libc::SYS_ftruncate, &[FileDesc, Offset]),
    // `int truncate(const char *path, off_t length);`
    SyscallEntry::new("truncate", libc::SYS_truncate, &[FilePath, Offset]),
    // `int fallocate(int fd, int mode, off_t offset, off_t len);`
    SyscallEntry::new("fallocate", libc::SYS_fallocate, &[FileDesc, Int, Offset, Offset]),
    // `int fsync(int fd);`
    SyscallEntry::new("fsync", libc::SYS_fsync, &[FileDesc]),
    // `int fdatasync(int fd);`
    SyscallEntry::new("fdatasync", libc::SYS_fdatasync, &[FileDesc]),
    /* Directories and links */
    // `int mkdirat(int dirfd, const char *pathname, mode_t mode);`
    SyscallEntry::new("mkdirat", libc::SYS_mkdirat, &[DirFd, FilePath, Mode]),
    // `int unlinkat(int dirfd, const char *pathname, int flags);`
    SyscallEntry::new("unlinkat", libc::SYS_unlinkat, &[DirFd, FilePath, AtFlag]),
    // `int symlinkat(const char *target, int newdirfd, const char *linkpath);`
    SyscallEntry::new("symlinkat", libc::SYS_symlinkat, &[FilePath, DirFd, FilePath]),
    // `int linkat(int olddirfd, const char *oldpath, int newdirfd, const char *newpath, int flags);`
    SyscallEntry::new("linkat", libc::SYS_linkat, &[DirFd, FilePath, DirFd, FilePath, AtFlag]),
    // `ssize_t getdents64(int fd, void *dirp, size_t count);`
    SyscallEntry::new("getdents64", libc::SYS_getdents64, &[FileDesc, VoidBuf, Size]),
    // `ssize_t readlinkat(int dirfd, const char *pathname, char *buf, size_t bufsiz);`
    SyscallEntry::new("readlinkat", libc::SYS_readlinkat, &[DirFd, FilePath, VoidBuf, Size]),
    // `int faccessat(int dirfd, const char *pathname, int mode);`
    SyscallEntry::new("faccessat", libc::SYS_faccessat, &[DirFd, FilePath, Mode]),
    // `char *getcwd(char *buf, size_t size);`
    SyscallEntry::new("getcwd", libc::SYS_getcwd, &[VoidBuf, Size]),
    // `int chdir(const char *path);`
    SyscallEntry::new("chdir", libc::SYS_chdir, &[FilePath]),
    // `int fchdir(int fd);`
    SyscallEntry::new("fchdir", libc::SYS_fchdir, &[FileDesc]),
    /* Descriptors */
    // `int dup(int oldfd);`
    SyscallEntry::new("dup", libc::SYS_dup, &[FileDesc]),
    // `int dup3(int oldfd, int newfd, int flags);`
    SyscallEntry::new("dup3", libc::SYS_dup3, &[FileDesc, FileDesc, OpenFlag]),
    // `int fcntl(int fd, int cmd, long arg);`
    SyscallEntry::new("fcntl", libc::SYS_fcntl, &[FileDesc, FcntlCmd, Int]).alarm(),
    // `int flock(int fd, int operation);`
    SyscallEntry::new("flock", libc::SYS_flock, &[FileDesc, Int]).alarm(),
    /* Metadata */
    // `int fchmod(int fd, mode_t mode);`
    SyscallEntry::new("fchmod", libc::SYS_fchmod, &[FileDesc, Mode]),
    // `int fchmodat(int dirfd, const char *pathname, mode_t mode);`
    SyscallEntry::new("fchmodat", libc::SYS_fchmodat, &[DirFd, FilePath, Mode]),
    // `int statfs(const char *path, struct statfs *buf);`
    SyscallEntry::new("statfs", libc::SYS_statfs, &[FilePath, StatFs]),
    // `int fstatfs(int fd, struct statfs *buf);`
    SyscallEntry::new("fstatfs", libc::SYS_fstatfs, &[FileDesc, StatFs]),
    // `mode_t umask(mode_t mask);`
    SyscallEntry::new("umask", libc::SYS_umask, &[Mode]),
    /* Processes */
    // `pid_t wait4(pid_t pid, int *wstatus, int options, struct rusage *rusage);`
    SyscallEntry::new("wait4", libc::SYS_wait4, &[Pid, StatBuf, WaitOption, Rusage]).alarm(),
    // `int getrusage(int who, struct rusage *usage);`
    SyscallEntry::new("getrusage", libc::SYS_getrusage, &[Int, Rusage]),
    /* Memory */
    // `int munmap(void *addr, size_t length);`
    SyscallEntry::new("munmap", libc::SYS_munmap, &[MapAddress, Size]),
    // `int mprotect(void *addr, size_t len, int prot);`
    SyscallEntry::new("mprotect", libc::SYS_mprotect, &[MapAddress, Size, Prot]),
    // `int madvise(void *addr, size_t length, int advice);`
    SyscallEntry::new("madvise", libc::SYS_madvise, &[MapAddress, Size, Advice]),
    // `int msync(void *addr, size_t length, int flags);`
    SyscallEntry::new("msync", libc::SYS_msync, &[MapAddress, Size, Int]),
    // `int mlock(const void *addr, size_t len);`
    SyscallEntry::new("mlock", libc::SYS_mlock, &[MapAddress, Size]),
    // `int munlock(const void *addr, size_t len);`
    SyscallEntry::new("munlock", libc::SYS_munlock, &[MapAddress, Size]),
    /* Privileged */
    // `int chroot(const char *path);`
    SyscallEntry::new("chroot", libc::SYS_chroot, &[FilePath]).root(),
    // `int mount(const char *source, const char *target, const char *filesystemtype, unsigned long mountflags, const void *data);`
    SyscallEntry::new("mount", libc::SYS_mount, &[FilePath, FilePath, FilePath, Int, VoidBuf]).root().off(),
];
