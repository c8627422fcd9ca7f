//! Signal plumbing shared by fault interception and thread inspection

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
