strong_type!(
    /// Numeric user id as seen by the kernel for the calling process.
    Uid,
    u32
);
strong_type!(
    /// Numeric group id of the calling process.
    Gid,
    u32
);
strong_type!(
    /// Process id of the caller. Zero when the kernel did not supply one.
    Pid,
    i32
);

impl Uid {
    /// `(uid_t)-1`, used by chown to mean "leave unchanged".
    pub const UNCHANGED: Uid = Uid(u32::MAX);
}

impl Gid {
    pub const UNCHANGED: Gid = Gid(u32::MAX);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_sentinels() {
        assert_eq!(*Uid::UNCHANGED, u32::MAX);
        assert_eq!(*Gid::UNCHANGED, u32::MAX);
        assert_ne!(Uid(0), Uid::UNCHANGED);
    }

    #[test]
    fn test_pid_debug() {
        assert_eq!(format!("{:?}", Pid(1234)), "Pid(1234)");
    }
}
