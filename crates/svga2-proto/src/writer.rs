//! Safe command stream builder.
//!
//! Appends canonical `{opcode, payload}` packets into a growing byte
//! buffer. The same stream format is accepted by both submission paths:
//! command buffer payloads and the legacy word FIFO.

use crate::cmd::{
    MobFormat, OtableType, Svga3dCmd, SvgaCmd, SVGA_DC_CMD_START_STOP_CONTEXT, SVGA_REMAP_GMR2_PPN64,
};

#[derive(Debug, Default, Clone)]
pub struct CmdWriter {
    buf: Vec<u8>,
}

impl CmdWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The stream as 32-bit words, for the legacy FIFO path. Every packet
    /// appended by this writer is word-aligned.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        debug_assert_eq!(self.buf.len() % 4, 0);
        self.buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().expect("4-byte chunk")))
    }

    fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 3D commands carry an explicit `{id, size_bytes}` header.
    fn push_3d_header(&mut self, cmd: Svga3dCmd, payload_bytes: usize) {
        debug_assert_eq!(payload_bytes % 4, 0);
        self.push_u32(cmd as u32);
        self.push_u32(payload_bytes as u32);
    }

    pub fn update(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.push_u32(SvgaCmd::Update as u32);
        self.push_u32(x);
        self.push_u32(y);
        self.push_u32(width);
        self.push_u32(height);
    }

    pub fn fence(&mut self, fence_id: u32) {
        self.push_u32(SvgaCmd::Fence as u32);
        self.push_u32(fence_id);
    }

    pub fn define_gmr2(&mut self, gmr_id: u32, num_pages: u32) {
        self.push_u32(SvgaCmd::DefineGmr2 as u32);
        self.push_u32(gmr_id);
        self.push_u32(num_pages);
    }

    /// Remaps a page range of a GMR2 region. Page numbers are emitted in
    /// the 64-bit format.
    pub fn remap_gmr2(&mut self, gmr_id: u32, offset_pages: u32, ppns: &[u64]) {
        self.push_u32(SvgaCmd::RemapGmr2 as u32);
        self.push_u32(gmr_id);
        self.push_u32(SVGA_REMAP_GMR2_PPN64);
        self.push_u32(offset_pages);
        self.push_u32(ppns.len() as u32);
        for &ppn in ppns {
            self.push_u64(ppn);
        }
    }

    pub fn define_gb_mob64(&mut self, mob_id: u32, format: MobFormat, base_ppn: u64, size_bytes: u32) {
        self.push_3d_header(Svga3dCmd::DefineGbMob64, 20);
        self.push_u32(mob_id);
        self.push_u32(format as u32);
        self.push_u64(base_ppn);
        self.push_u32(size_bytes);
    }

    pub fn destroy_gb_mob(&mut self, mob_id: u32) {
        self.push_3d_header(Svga3dCmd::DestroyGbMob, 4);
        self.push_u32(mob_id);
    }

    pub fn set_otable_base64(
        &mut self,
        table: OtableType,
        base_ppn: u64,
        size_bytes: u32,
        valid_size_bytes: u32,
        format: MobFormat,
    ) {
        self.push_3d_header(Svga3dCmd::SetOtableBase64, 24);
        self.push_u32(table as u32);
        self.push_u64(base_ppn);
        self.push_u32(size_bytes);
        self.push_u32(valid_size_bytes);
        self.push_u32(format as u32);
    }

    pub fn readback_otable(&mut self, table: OtableType) {
        self.push_3d_header(Svga3dCmd::ReadbackOtable, 4);
        self.push_u32(table as u32);
    }

    /// Device-context command: stop (`enable == 0`) or start a command
    /// buffer context. Only meaningful in buffers posted to
    /// `SVGA_CB_CONTEXT_DEVICE`.
    pub fn start_stop_context(&mut self, context: u32, enable: bool) {
        self.push_u32(SVGA_DC_CMD_START_STOP_CONTEXT);
        self.push_u32(enable as u32);
        self.push_u32(context);
    }
}
