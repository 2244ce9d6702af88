use svga2_mem::{HostMemoryError, PageTableError, PoolError};
use svga2_proto::CbStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SvgaError>;

#[derive(Debug, Error)]
pub enum SvgaError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    HostMemory(#[from] HostMemoryError),

    #[error(transparent)]
    PageTable(#[from] PageTableError),

    #[error("device accepted no supported version id")]
    VersionNegotiation,

    #[error("region id {id} is already defined")]
    RegionExists { id: u32 },

    #[error("region id {id} is not defined")]
    UnknownRegion { id: u32 },

    #[error("cannot create a zero-sized region")]
    EmptyRegion,

    #[error("unknown command buffer handle")]
    UnknownBuffer,

    #[error("command buffer is still in flight")]
    BufferInFlight,

    #[error("payload of {len} bytes exceeds buffer capacity of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("device rejected command buffer: {status:?} at offset {offset}")]
    DeviceCommand { status: CbStatus, offset: u32 },
}
