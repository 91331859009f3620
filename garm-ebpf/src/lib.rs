// eBPF/XDP is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]

pub mod loader;
pub mod maps;

pub use loader::XdpFilter;
pub use maps::{KernelStats, SharedMaps};

#[derive(Debug, thiserror::Error)]
pub enum EbpfError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("XDP program 'garm_xdp' not found in BPF object")]
    ProgramNotFound,

    #[error("BPF program is not an XDP program: {0}")]
    ProgramType(#[source] aya::programs::ProgramError),

    #[error("failed to load XDP program into kernel: {0}")]
    ProgramLoad(#[source] aya::programs::ProgramError),

    #[error("failed to attach XDP program to interface {iface}: {source}")]
    Attach {
        iface: String,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("map '{0}' not found in BPF object")]
    MapNotFound(&'static str),

    #[error("map '{name}' has an unexpected type: {source}")]
    MapType {
        name: &'static str,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("failed to open pinned map '{name}': {source}")]
    OpenPinned {
        name: &'static str,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("map access failed: {0}")]
    MapAccess(#[from] aya::maps::MapError),
}
