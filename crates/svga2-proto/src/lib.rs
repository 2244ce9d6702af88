//! Wire-level definitions for the SVGA-II paravirtual GPU protocol.
//!
//! This crate is the single source of truth for register indices, FIFO
//! cells, capability bits, command opcodes and the command buffer header
//! layout. It carries no device or memory model of its own; the engine
//! crates build on these definitions.

pub mod cmd;
pub mod cmdbuf;
pub mod fifo;
pub mod reg;
pub mod writer;

pub use cmd::{MobFormat, OtableType, Svga3dCmd, SvgaCmd};
pub use cmdbuf::{CbFlags, CbHeader, CbStatus};
pub use fifo::FifoCaps;
pub use reg::{SvgaCaps, SvgaReg};
pub use writer::CmdWriter;
