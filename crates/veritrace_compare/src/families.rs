//! Syscall families.
//!
//! Equivalent programs built by different toolchains reach the same kernel
//! service through different entry points: `open` vs `openat`, `write` vs
//! `writev`, `fork` vs `clone3`. Folding maps each to one family name.

/// Family name for a syscall; unknown names map to themselves
#[must_use]
pub fn fold_family(name: &str) -> &str {
    match name {
        "open" | "openat" | "openat2" | "creat" => "open",
        "stat" | "lstat" | "fstat" | "newfstatat" | "fstatat64" | "statx" | "stat64"
        | "lstat64" | "fstat64" => "stat",
        "read" | "pread64" | "readv" | "preadv" | "preadv2" => "read",
        "write" | "pwrite64" | "writev" | "pwritev" | "pwritev2" => "write",
        "clone" | "clone3" | "fork" | "vfork" => "spawn",
        "wait4" | "waitid" | "waitpid" => "wait",
        "execve" | "execveat" => "exec",
        "exit" | "exit_group" => "exit",
        "dup" | "dup2" | "dup3" => "dup",
        "pipe" | "pipe2" => "pipe",
        "accept" | "accept4" => "accept",
        "getdents" | "getdents64" => "getdents",
        "rename" | "renameat" | "renameat2" => "rename",
        "unlink" | "unlinkat" | "rmdir" => "unlink",
        "mkdir" | "mkdirat" => "mkdir",
        "access" | "faccessat" | "faccessat2" => "access",
        "readlink" | "readlinkat" => "readlink",
        "chmod" | "fchmod" | "fchmodat" => "chmod",
        "close" | "close_range" => "close",
        "sendto" | "sendmsg" | "send" => "send",
        "recvfrom" | "recvmsg" | "recv" => "recv",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_family() {
        assert_eq!(fold_family("open"), "open");
        assert_eq!(fold_family("openat"), "open");
        assert_eq!(fold_family("creat"), "open");
    }

    #[test]
    fn test_io_families() {
        assert_eq!(fold_family("writev"), "write");
        assert_eq!(fold_family("pread64"), "read");
        assert_eq!(fold_family("newfstatat"), "stat");
        assert_eq!(fold_family("statx"), "stat");
    }

    #[test]
    fn test_process_families() {
        assert_eq!(fold_family("clone3"), "spawn");
        assert_eq!(fold_family("vfork"), "spawn");
        assert_eq!(fold_family("exit_group"), "exit");
        assert_eq!(fold_family("execve"), "exec");
    }

    #[test]
    fn test_unknown_passthrough() {
        assert_eq!(fold_family("socket"), "socket");
        assert_eq!(fold_family(""), "");
    }
}
