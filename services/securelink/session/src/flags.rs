//! Dial option flags.

use bitflags::bitflags;

bitflags! {
    /// Independent dial options; the empty set is the secure default
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DialFlags: u32 {
        /// Accept a trusted certificate whose names do not match the host
        const INSECURE_SKIP_HOST_VERIFICATION = 1 << 0;
        /// Do not send the hostname indication (SNI)
        const DISABLE_SNI = 1 << 1;
    }
}
