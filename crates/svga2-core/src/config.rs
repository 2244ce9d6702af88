/// Engine tunables. Every field defaults to "follow what the device
/// reports"; embedders override individual knobs.
#[derive(Clone, Debug, Default)]
pub struct SvgaConfig {
    /// Version id to offer first during negotiation. Defaults to the
    /// newest id this engine speaks.
    pub prefer_device_version: Option<u32>,

    /// Force command buffer submission on or off. `None` uses them
    /// whenever the device advertises `SvgaCaps::COMMAND_BUFFERS`.
    pub enable_command_buffers: Option<bool>,

    /// Force the hardware cursor on or off.
    pub hardware_cursor: Option<bool>,

    /// Upper bound on VRAM the engine will report to callers, in bytes.
    pub vram_cap_bytes: Option<u64>,

    /// Some device builds lose the pitch-lock FIFO register; when set,
    /// mode sets go through the register file instead.
    pub pitch_lock_workaround: bool,

    /// Submit MOB define/destroy commands synchronously. Slower but makes
    /// allocation failures visible at the call site.
    pub sync_mob_commands: bool,
}
