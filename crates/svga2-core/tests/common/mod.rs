//! A scripted SVGA device model for integration tests.
//!
//! The mock keeps a register file, FIFO memory and a queue of posted
//! command buffer headers. `doorbell` plays the device: it consumes the
//! FIFO ring, then processes posted buffers against host memory, writing
//! completion status and fence progress back the way hardware does.
//! Everything it executes is recorded for assertions.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;

use svga2_core::{DeviceIo, Svga, SvgaConfig};
use svga2_mem::{HostMemory, VecHostMemory};
use svga2_proto::cmd::SVGA_DC_CMD_START_STOP_CONTEXT;
use svga2_proto::cmdbuf::{
    CB_ERROR_OFFSET_OFFSET, CB_STATUS_OFFSET, SVGA_CB_CONTEXT_DEVICE, SVGA_CB_CONTEXT_MASK,
};
use svga2_proto::fifo::{
    SVGA_FIFO_CAPABILITIES, SVGA_FIFO_FENCE, SVGA_FIFO_MAX, SVGA_FIFO_MIN, SVGA_FIFO_NEXT_CMD,
    SVGA_FIFO_NUM_REGS, SVGA_FIFO_STOP,
};
use svga2_proto::reg::SVGA_ID_2;
use svga2_proto::{CbHeader, CbStatus, FifoCaps, Svga3dCmd, SvgaCaps, SvgaCmd, SvgaReg};

const FIFO_WORDS: usize = 1024;

pub struct MockDevice {
    pub max_version: u32,
    regs: HashMap<u32, u32>,
    fifo: Vec<u32>,
    command_high: u32,
    /// Posted but not yet processed command buffer headers.
    pending: Vec<(u64, u32)>,
    /// Doorbells to swallow before completing normal-context buffers.
    pub doorbells_before_complete: u32,
    /// Fail the next normal-context buffer with this status.
    pub fail_next: Option<(CbStatus, u32)>,

    pub executed: Vec<u32>,
    pub restarts: Vec<(u32, bool)>,
    pub defined_mobs: Vec<(u32, u32, u64, u32)>,
    pub destroyed_mobs: Vec<u32>,
    pub otable_sets: Vec<(u32, u64, u32, u32, u32)>,
    pub otable_readbacks: Vec<u32>,
    pub gmr_bindings: Vec<(u32, u32)>,
    gmr_id: u32,
}

impl MockDevice {
    pub fn new(caps: SvgaCaps, fifo_caps: FifoCaps) -> Self {
        let mut regs = HashMap::new();
        regs.insert(SvgaReg::Capabilities as u32, caps.bits());
        regs.insert(SvgaReg::GmrMaxIds as u32, 1000);
        regs.insert(SvgaReg::GmrMaxDescriptorLength as u32, 4096);
        regs.insert(SvgaReg::GmrsMaxPages as u32, 65536);
        regs.insert(SvgaReg::VramSize as u32, 64 * 1024 * 1024);

        let mut fifo = vec![0u32; FIFO_WORDS];
        let min = SVGA_FIFO_NUM_REGS * 4;
        fifo[SVGA_FIFO_MIN as usize] = min;
        fifo[SVGA_FIFO_MAX as usize] = (FIFO_WORDS * 4) as u32;
        fifo[SVGA_FIFO_NEXT_CMD as usize] = min;
        fifo[SVGA_FIFO_STOP as usize] = min;
        fifo[SVGA_FIFO_CAPABILITIES as usize] = fifo_caps.bits();

        Self {
            max_version: SVGA_ID_2,
            regs,
            fifo,
            command_high: 0,
            pending: Vec::new(),
            doorbells_before_complete: 0,
            fail_next: None,
            executed: Vec::new(),
            restarts: Vec::new(),
            defined_mobs: Vec::new(),
            destroyed_mobs: Vec::new(),
            otable_sets: Vec::new(),
            otable_readbacks: Vec::new(),
            gmr_bindings: Vec::new(),
            gmr_id: 0,
        }
    }

    fn complete_fence(&mut self, id: u32) {
        self.fifo[SVGA_FIFO_FENCE as usize] = id;
        self.regs.insert(SvgaReg::Fence as u32, id);
    }

    /// Executes a word stream, recording opcodes and completing fences.
    fn run_stream(&mut self, words: &[u32]) {
        let mut i = 0;
        while i < words.len() {
            let opcode = words[i];
            self.executed.push(opcode);
            i += 1;
            if let Some(cmd) = SvgaCmd::from_u32(opcode) {
                match cmd {
                    SvgaCmd::Invalid => {}
                    SvgaCmd::Update => i += 4,
                    SvgaCmd::Fence => {
                        self.complete_fence(words[i]);
                        i += 1;
                    }
                    SvgaCmd::DefineGmr2 => i += 2,
                    SvgaCmd::RemapGmr2 => {
                        let num = words[i + 3] as usize;
                        i += 4 + num * 2;
                    }
                }
            } else if let Some(cmd) = Svga3dCmd::from_u32(opcode) {
                let size = words[i] as usize / 4;
                let body = &words[i + 1..i + 1 + size];
                i += 1 + size;
                let u64_at =
                    |o: usize| u64::from(body[o]) | (u64::from(body[o + 1]) << 32);
                match cmd {
                    Svga3dCmd::DefineGbMob64 => {
                        self.defined_mobs
                            .push((body[0], body[1], u64_at(2), body[4]));
                    }
                    Svga3dCmd::DestroyGbMob => self.destroyed_mobs.push(body[0]),
                    Svga3dCmd::SetOtableBase64 => {
                        self.otable_sets
                            .push((body[0], u64_at(1), body[3], body[4], body[5]));
                    }
                    Svga3dCmd::ReadbackOtable => self.otable_readbacks.push(body[0]),
                }
            } else {
                // Unknown legacy command; nothing sensible to skip.
                break;
            }
        }
    }

    /// Device-context streams are `{cmd, enable, context}` triples.
    fn run_device_context(&mut self, words: &[u32]) {
        let mut i = 0;
        while i + 2 < words.len() {
            if words[i] == SVGA_DC_CMD_START_STOP_CONTEXT {
                self.restarts.push((words[i + 2], words[i + 1] != 0));
            }
            i += 3;
        }
    }

    fn drain_fifo(&mut self) {
        let min = self.fifo[SVGA_FIFO_MIN as usize];
        let max = self.fifo[SVGA_FIFO_MAX as usize];
        let next = self.fifo[SVGA_FIFO_NEXT_CMD as usize];
        let mut stop = self.fifo[SVGA_FIFO_STOP as usize];

        let mut words = Vec::new();
        while stop != next {
            words.push(self.fifo[(stop / 4) as usize]);
            stop += 4;
            if stop >= max {
                stop = min;
            }
        }
        self.fifo[SVGA_FIFO_STOP as usize] = stop;
        self.run_stream(&words);
    }

    fn payload_words(host: &dyn HostMemory, hdr: &CbHeader) -> Vec<u32> {
        let mut bytes = vec![0u8; hdr.length as usize];
        host.read_physical(hdr.pa, &mut bytes).expect("payload read");
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn process_buffers(&mut self, host: &mut dyn HostMemory) {
        let pending = std::mem::take(&mut self.pending);
        for (header_pa, context) in pending {
            let mut raw = [0u8; CbHeader::SIZE_BYTES];
            host.read_physical(header_pa, &mut raw).expect("header read");
            let hdr = CbHeader::decode(&raw);

            if context == SVGA_CB_CONTEXT_DEVICE {
                let words = Self::payload_words(host, &hdr);
                self.run_device_context(&words);
                host.write_u32_le(header_pa + CB_STATUS_OFFSET, CbStatus::Completed as u32)
                    .unwrap();
                continue;
            }

            if self.doorbells_before_complete > 0 {
                self.doorbells_before_complete -= 1;
                self.pending.push((header_pa, context));
                continue;
            }

            if let Some((status, offset)) = self.fail_next.take() {
                host.write_u32_le(header_pa + CB_ERROR_OFFSET_OFFSET, offset)
                    .unwrap();
                host.write_u32_le(header_pa + CB_STATUS_OFFSET, status as u32)
                    .unwrap();
                continue;
            }

            let words = Self::payload_words(host, &hdr);
            self.run_stream(&words);
            host.write_u32_le(header_pa + CB_STATUS_OFFSET, CbStatus::Completed as u32)
                .unwrap();
        }
    }
}

impl DeviceIo for MockDevice {
    fn read_reg(&mut self, reg: SvgaReg) -> u32 {
        self.regs.get(&(reg as u32)).copied().unwrap_or(0)
    }

    fn write_reg(&mut self, reg: SvgaReg, value: u32) {
        match reg {
            SvgaReg::Id => {
                let answer = value.min(self.max_version);
                self.regs.insert(reg as u32, answer);
            }
            SvgaReg::CommandHigh => self.command_high = value,
            SvgaReg::CommandLow => {
                let pa = (u64::from(self.command_high) << 32)
                    | u64::from(value & !SVGA_CB_CONTEXT_MASK);
                self.pending.push((pa, value & SVGA_CB_CONTEXT_MASK));
            }
            SvgaReg::GmrId => {
                self.gmr_id = value;
                self.regs.insert(reg as u32, value);
            }
            SvgaReg::GmrDescriptor => {
                self.gmr_bindings.push((self.gmr_id, value));
                self.regs.insert(reg as u32, value);
            }
            _ => {
                self.regs.insert(reg as u32, value);
            }
        }
    }

    fn fifo_read(&mut self, cell: u32) -> u32 {
        self.fifo[cell as usize]
    }

    fn fifo_write(&mut self, cell: u32, value: u32) {
        self.fifo[cell as usize] = value;
    }

    fn doorbell(&mut self, host: &mut dyn HostMemory) {
        self.drain_fifo();
        self.process_buffers(host);
    }
}

/// Capability set of a modern device: command buffers plus guest-backed
/// objects.
pub fn modern_caps() -> SvgaCaps {
    SvgaCaps::EXTENDED_FIFO
        | SvgaCaps::GMR
        | SvgaCaps::GMR2
        | SvgaCaps::COMMAND_BUFFERS
        | SvgaCaps::GBOBJECTS
        | SvgaCaps::CURSOR
}

pub fn modern_fifo_caps() -> FifoCaps {
    FifoCaps::FENCE | FifoCaps::GMR2
}

pub const HOST_BYTES: usize = 16 * 1024 * 1024;

/// An engine over a modern mock device and 16 MiB of host memory.
pub fn engine() -> Svga<MockDevice, VecHostMemory> {
    engine_with(modern_caps(), modern_fifo_caps(), SvgaConfig::default())
}

pub fn engine_with(
    caps: SvgaCaps,
    fifo_caps: FifoCaps,
    config: SvgaConfig,
) -> Svga<MockDevice, VecHostMemory> {
    let device = MockDevice::new(caps, fifo_caps);
    let host = VecHostMemory::new(HOST_BYTES);
    Svga::new(device, host, config, HOST_BYTES as u64).expect("engine init")
}
