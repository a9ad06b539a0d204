pub type CmdResult<T> = qsync::Result<(T, i32)>;

pub mod sync;
