use std::os::fd::AsRawFd;
use std::path::Path;

use aya::maps::XskMap;
use aya::programs::xdp::XdpLinkId;
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use tracing::{info, warn};

use crate::maps::{sum_percpu, KernelStats};
use crate::EbpfError;

/// Raw bytes of the compiled XDP BPF object, embedded at compile time.
/// `include_bytes_aligned!` ensures 8-byte alignment required by aya's ELF parser.
#[cfg(feature = "embed-bpf")]
static XDP_BPF_BYTES: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/garm-xdp.o"));

/// Where `cargo build` inside `garm-ebpf-xdp/` leaves the compiled object.
/// Used when no explicit path is given and nothing is embedded.
#[cfg(not(feature = "embed-bpf"))]
const DEFAULT_OBJECT_PATH: &str = "garm-ebpf-xdp/target/bpfel-unknown-none/release/garm-ebpf-xdp";

/// Manages the XDP fast-path program lifecycle.
///
/// Loading pins the shared maps (`vpp_acl_v4`, `vpp_stats`, `vpp_sessions`)
/// under `pin_root` so the host-stack classifier can open them, and attaches
/// the classifier program to the given interface. AF_XDP sockets are bound to
/// receive queues with [`XdpFilter::register_socket`].
pub struct XdpFilter {
    ebpf: Ebpf,
    iface: String,
    link: Option<XdpLinkId>,
}

impl XdpFilter {
    /// Load the XDP program and attach it to `iface`.
    ///
    /// `object` names a compiled BPF object on disk. With `None`, a build
    /// carrying the `embed-bpf` feature uses the object compiled by the
    /// build script; otherwise the conventional artifact path of the
    /// `garm-ebpf-xdp` crate is tried.
    pub fn load(iface: &str, object: Option<&Path>, pin_root: &Path) -> Result<Self, EbpfError> {
        // Remove the locked memory limit so BPF maps and the UMEM can be
        // created without depending on the deployment environment's ulimits.
        unsafe {
            let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            if libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) != 0 {
                warn!("failed to raise RLIMIT_MEMLOCK; BPF map creation may fail");
            }
        }

        let mut loader = EbpfLoader::new();
        loader.map_pin_path(pin_root);

        let mut ebpf = match object {
            Some(path) => loader.load_file(path).map_err(EbpfError::Load)?,
            #[cfg(feature = "embed-bpf")]
            None => loader.load(XDP_BPF_BYTES).map_err(EbpfError::Load)?,
            #[cfg(not(feature = "embed-bpf"))]
            None => loader.load_file(DEFAULT_OBJECT_PATH).map_err(EbpfError::Load)?,
        };

        let program: &mut Xdp = ebpf
            .program_mut("garm_xdp")
            .ok_or(EbpfError::ProgramNotFound)?
            .try_into()
            .map_err(EbpfError::ProgramType)?;

        program.load().map_err(EbpfError::ProgramLoad)?;
        let link = program
            .attach(iface, XdpFlags::default())
            .map_err(|source| EbpfError::Attach { iface: iface.to_string(), source })?;

        info!(iface, "XDP classifier attached");

        Ok(Self { ebpf, iface: iface.to_string(), link: Some(link) })
    }

    /// Bind an AF_XDP socket to a receive queue in the redirect map.
    /// Redirected frames from `queue_id` will land on this socket's RX ring.
    pub fn register_socket(&mut self, queue_id: u32, socket: &impl AsRawFd) -> Result<(), EbpfError> {
        let map = self
            .ebpf
            .map_mut("XSK_SOCKETS")
            .ok_or(EbpfError::MapNotFound("XSK_SOCKETS"))?;
        let mut xsk_map: XskMap<_> = map
            .try_into()
            .map_err(|source| EbpfError::MapType { name: "XSK_SOCKETS", source })?;
        xsk_map.set(queue_id, socket.as_raw_fd(), 0)?;
        info!(queue_id, "AF_XDP socket registered for redirect");
        Ok(())
    }

    /// Current kernel verdict counters, summed across CPUs.
    pub fn kernel_stats(&self) -> Result<KernelStats, EbpfError> {
        let map = self
            .ebpf
            .map("vpp_stats")
            .ok_or(EbpfError::MapNotFound("vpp_stats"))?;
        let stats: aya::maps::PerCpuArray<_, u64> = map
            .try_into()
            .map_err(|source| EbpfError::MapType { name: "vpp_stats", source })?;
        sum_percpu(&stats)
    }

    /// Detach the program from the interface. Idempotent; also runs on drop.
    pub fn detach(&mut self) {
        let Some(link) = self.link.take() else { return };
        match self.ebpf.program_mut("garm_xdp") {
            Some(prog) => {
                let xdp: Result<&mut Xdp, _> = prog.try_into();
                match xdp.map(|p| p.detach(link)) {
                    Ok(Ok(())) => info!(iface = %self.iface, "XDP classifier detached"),
                    Ok(Err(err)) => warn!(iface = %self.iface, %err, "XDP detach failed"),
                    Err(err) => warn!(iface = %self.iface, %err, "XDP detach failed"),
                }
            }
            None => warn!(iface = %self.iface, "XDP program vanished before detach"),
        }
    }

    pub fn interface(&self) -> &str {
        &self.iface
    }
}

impl Drop for XdpFilter {
    fn drop(&mut self) {
        self.detach();
    }
}
