//! Command records and command buffer lifecycle
//!
//! Recording never touches the driver. Each operation appends a [`Command`]
//! that names the objects it uses by handle; handles are resolved again at
//! replay, so a record that outlives its objects fails there instead of
//! touching freed driver state.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backends::gl::driver::{BarrierBits, Filter, IndexType};
use crate::backends::gl::state::{Scissor, Viewport};
use crate::core::error::{VulkanError, VulkanResult};
use crate::core::info::{
    ClearAttachment, ClearColorValue, ClearValue, CommandBufferBeginInfo,
    CommandBufferInheritanceInfo, CommandPoolCreateInfo,
};

/// Work run after a submission completes, in recorded order
pub type Action = Arc<dyn Fn() + Send + Sync>;

/// One recorded operation
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        clear_values: Vec<ClearValue>,
    },
    NextSubpass,
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffers {
        first: u32,
        buffers: Vec<(vk::Buffer, u64)>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: IndexType,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        offset: u32,
        data: Vec<u8>,
    },
    SetViewport {
        first: u32,
        viewports: Vec<Viewport>,
    },
    SetScissor {
        first: u32,
        scissors: Vec<Scissor>,
    },
    SetLineWidth(f32),
    SetDepthBias {
        constant: f32,
        clamp: f32,
        slope: f32,
    },
    SetBlendConstants([f32; 4]),
    SetDepthBounds {
        min: f32,
        max: f32,
    },
    SetStencilCompareMask(vk::StencilFaceFlags, u32),
    SetStencilWriteMask(vk::StencilFaceFlags, u32),
    SetStencilReference(vk::StencilFaceFlags, u32),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: vk::Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: vk::Buffer,
        offset: u64,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        image: vk::Image,
        buffer: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImage {
        src: vk::Image,
        dst: vk::Image,
        regions: Vec<vk::ImageCopy>,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        regions: Vec<vk::ImageBlit>,
        filter: Filter,
    },
    UpdateBuffer {
        buffer: vk::Buffer,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        data: u32,
    },
    ClearColorImage {
        image: vk::Image,
        color: ClearColorValue,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    ClearDepthStencilImage {
        image: vk::Image,
        depth: f32,
        stencil: u32,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    ClearAttachments {
        attachments: Vec<ClearAttachment>,
        rects: Vec<vk::ClearRect>,
    },
    PipelineBarrier(BarrierBits),
    SetEvent {
        event: vk::Event,
        signaled: bool,
    },
    WaitEvents {
        events: Vec<vk::Event>,
        barrier: BarrierBits,
    },
    ExecuteCommands(Vec<Arc<[Command]>>),
}

/// Where a command may be recorded relative to a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Inside,
    Outside,
    Either,
}

impl Command {
    fn scope(&self) -> Scope {
        match self {
            Self::NextSubpass
            | Self::EndRenderPass
            | Self::Draw { .. }
            | Self::DrawIndexed { .. }
            | Self::DrawIndirect { .. }
            | Self::ClearAttachments { .. } => Scope::Inside,
            Self::BeginRenderPass { .. }
            | Self::Dispatch { .. }
            | Self::DispatchIndirect { .. }
            | Self::CopyBuffer { .. }
            | Self::CopyBufferToImage { .. }
            | Self::CopyImageToBuffer { .. }
            | Self::CopyImage { .. }
            | Self::BlitImage { .. }
            | Self::UpdateBuffer { .. }
            | Self::FillBuffer { .. }
            | Self::ClearColorImage { .. }
            | Self::ClearDepthStencilImage { .. }
            | Self::SetEvent { .. } => Scope::Outside,
            _ => Scope::Either,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::BeginRenderPass { .. } => "vkCmdBeginRenderPass",
            Self::NextSubpass => "vkCmdNextSubpass",
            Self::EndRenderPass => "vkCmdEndRenderPass",
            Self::Draw { .. } => "vkCmdDraw",
            Self::DrawIndexed { .. } => "vkCmdDrawIndexed",
            Self::DrawIndirect { indexed: false, .. } => "vkCmdDrawIndirect",
            Self::DrawIndirect { indexed: true, .. } => "vkCmdDrawIndexedIndirect",
            Self::Dispatch { .. } => "vkCmdDispatch",
            Self::DispatchIndirect { .. } => "vkCmdDispatchIndirect",
            Self::CopyBuffer { .. } => "vkCmdCopyBuffer",
            Self::CopyBufferToImage { .. } => "vkCmdCopyBufferToImage",
            Self::CopyImageToBuffer { .. } => "vkCmdCopyImageToBuffer",
            Self::CopyImage { .. } => "vkCmdCopyImage",
            Self::BlitImage { .. } => "vkCmdBlitImage",
            Self::UpdateBuffer { .. } => "vkCmdUpdateBuffer",
            Self::FillBuffer { .. } => "vkCmdFillBuffer",
            Self::ClearColorImage { .. } => "vkCmdClearColorImage",
            Self::ClearDepthStencilImage { .. } => "vkCmdClearDepthStencilImage",
            Self::ClearAttachments { .. } => "vkCmdClearAttachments",
            Self::SetEvent { signaled: true, .. } => "vkCmdSetEvent",
            Self::SetEvent { signaled: false, .. } => "vkCmdResetEvent",
            _ => "command",
        }
    }
}

/// Lifecycle state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Freshly allocated or reset
    Initial,
    /// Between begin and end
    Recording,
    /// Ended and ready to submit
    Executable,
    /// Submitted and not yet completed
    Pending,
    /// One-time buffer that already ran
    Invalid,
}

/// Render pass open during recording
#[derive(Debug, Clone, Copy)]
struct OpenPass {
    subpass: u32,
    subpasses: u32,
}

#[derive(Default)]
struct Recording {
    state: Option<CommandBufferState>,
    one_time: bool,
    simultaneous: bool,
    continues_pass: bool,
    commands: Vec<Command>,
    frozen: Option<Arc<[Command]>>,
    actions: Vec<Action>,
    open_pass: Option<OpenPass>,
    inheritance: Option<CommandBufferInheritanceInfo>,
}

impl Recording {
    fn state(&self) -> CommandBufferState {
        self.state.unwrap_or(CommandBufferState::Initial)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn expect_recording(&self, what: &str) -> VulkanResult<()> {
        if self.state() == CommandBufferState::Recording {
            Ok(())
        } else {
            Err(VulkanError::contract(format!(
                "{what} on a command buffer in the {:?} state",
                self.state()
            )))
        }
    }

    fn in_pass(&self) -> bool {
        self.open_pass.is_some() || self.continues_pass
    }
}

/// Recorded work handed to replay
#[derive(Clone)]
pub struct Submission {
    /// Command list
    pub commands: Arc<[Command]>,
    /// After-submission actions
    pub actions: Vec<Action>,
}

/// One `VkCommandBuffer`
pub struct CommandBufferObject {
    /// Pool the buffer was allocated from
    pub pool: vk::CommandPool,
    /// Primary or secondary
    pub level: vk::CommandBufferLevel,
    reset_allowed: bool,
    inner: Mutex<Recording>,
}

impl CommandBufferObject {
    /// Buffer in the initial state
    pub fn new(pool: vk::CommandPool, level: vk::CommandBufferLevel, reset_allowed: bool) -> Self {
        Self {
            pool,
            level,
            reset_allowed,
            inner: Mutex::new(Recording::default()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandBufferState {
        self.inner.lock().state()
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .frozen
            .as_ref()
            .map_or(inner.commands.len(), |frozen| frozen.len())
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inheritance of a secondary buffer
    pub fn inheritance(&self) -> Option<CommandBufferInheritanceInfo> {
        self.inner.lock().inheritance
    }

    /// `vkBeginCommandBuffer`
    pub fn begin(&self, info: &CommandBufferBeginInfo) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        match inner.state() {
            CommandBufferState::Initial => {}
            CommandBufferState::Executable | CommandBufferState::Invalid if self.reset_allowed => {
                log::debug!("Implicit reset of command buffer on begin");
            }
            state => {
                return Err(VulkanError::contract(format!(
                    "cannot begin a command buffer in the {state:?} state"
                )))
            }
        }
        let continues_pass = self.level == vk::CommandBufferLevel::SECONDARY
            && info
                .flags
                .contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE);
        if continues_pass && info.inheritance.is_none() {
            return Err(VulkanError::contract(
                "RENDER_PASS_CONTINUE needs inheritance info",
            ));
        }
        inner.clear();
        inner.state = Some(CommandBufferState::Recording);
        inner.one_time = info
            .flags
            .contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        inner.simultaneous = info
            .flags
            .contains(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        inner.continues_pass = continues_pass;
        inner.inheritance = info.inheritance;
        Ok(())
    }

    /// `vkEndCommandBuffer`; freezes the command list
    pub fn end(&self) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        inner.expect_recording("vkEndCommandBuffer")?;
        if inner.open_pass.is_some() {
            return Err(VulkanError::contract(
                "vkEndCommandBuffer inside an open render pass",
            ));
        }
        let commands = std::mem::take(&mut inner.commands);
        log::debug!("Command buffer ended with {} commands", commands.len());
        inner.frozen = Some(Arc::from(commands));
        inner.state = Some(CommandBufferState::Executable);
        Ok(())
    }

    /// `vkResetCommandBuffer`
    pub fn reset(&self) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        if inner.state() == CommandBufferState::Pending {
            return Err(VulkanError::contract("cannot reset a pending command buffer"));
        }
        inner.clear();
        Ok(())
    }

    /// Append a command, checking the render pass scope
    pub fn record(&self, command: Command) -> VulkanResult<()> {
        self.record_with(command, Vec::new())
    }

    /// Append a command together with its after-submission actions
    pub fn record_with(&self, command: Command, actions: Vec<Action>) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        inner.expect_recording(command.name())?;
        match (command.scope(), inner.in_pass()) {
            (Scope::Inside, false) => {
                return Err(VulkanError::contract(format!(
                    "{} outside a render pass",
                    command.name()
                )))
            }
            (Scope::Outside, true) => {
                return Err(VulkanError::contract(format!(
                    "{} inside a render pass",
                    command.name()
                )))
            }
            _ => {}
        }
        match &command {
            Command::NextSubpass => {
                let pass = inner
                    .open_pass
                    .as_mut()
                    .ok_or_else(|| VulkanError::contract("vkCmdNextSubpass outside a render pass"))?;
                if pass.subpass + 1 >= pass.subpasses {
                    return Err(VulkanError::contract("vkCmdNextSubpass past the last subpass"));
                }
                pass.subpass += 1;
            }
            Command::EndRenderPass => {
                let pass = inner
                    .open_pass
                    .ok_or_else(|| VulkanError::contract("vkCmdEndRenderPass outside a render pass"))?;
                if pass.subpass + 1 != pass.subpasses {
                    return Err(VulkanError::contract(format!(
                        "render pass ended in subpass {} of {}",
                        pass.subpass, pass.subpasses
                    )));
                }
                inner.open_pass = None;
            }
            Command::BeginRenderPass { .. } => {
                return Err(VulkanError::contract(
                    "render passes begin through begin_render_pass",
                ))
            }
            _ => {}
        }
        inner.commands.push(command);
        inner.actions.extend(actions);
        Ok(())
    }

    /// Append a render pass begin; `subpasses` is the pass's subpass count
    pub fn begin_render_pass(&self, command: Command, subpasses: u32) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        inner.expect_recording("vkCmdBeginRenderPass")?;
        if self.level != vk::CommandBufferLevel::PRIMARY {
            return Err(VulkanError::contract(
                "render passes begin in primary command buffers",
            ));
        }
        if inner.in_pass() {
            return Err(VulkanError::contract("vkCmdBeginRenderPass inside a render pass"));
        }
        inner.open_pass = Some(OpenPass {
            subpass: 0,
            subpasses,
        });
        inner.commands.push(command);
        Ok(())
    }

    /// Append an after-submission action
    pub fn add_action(&self, action: Action) -> VulkanResult<()> {
        let mut inner = self.inner.lock();
        inner.expect_recording("adding a submission action")?;
        inner.actions.push(action);
        Ok(())
    }

    /// `vkCmdExecuteCommands`: capture the secondaries' frozen lists
    pub fn execute(&self, secondaries: &[Arc<Self>]) -> VulkanResult<()> {
        if self.level != vk::CommandBufferLevel::PRIMARY {
            return Err(VulkanError::contract(
                "vkCmdExecuteCommands needs a primary command buffer",
            ));
        }
        let mut lists = Vec::with_capacity(secondaries.len());
        let mut actions = Vec::new();
        for secondary in secondaries {
            if std::ptr::eq(secondary.as_ref(), self) {
                return Err(VulkanError::contract("a command buffer cannot execute itself"));
            }
            if secondary.level != vk::CommandBufferLevel::SECONDARY {
                return Err(VulkanError::contract(
                    "vkCmdExecuteCommands takes secondary command buffers",
                ));
            }
            let submission = secondary.submission()?;
            lists.push(submission.commands);
            actions.extend(submission.actions);
        }
        self.record_with(Command::ExecuteCommands(lists), actions)
    }

    /// Recorded work, failing unless the buffer can be submitted
    pub fn submission(&self) -> VulkanResult<Submission> {
        let inner = self.inner.lock();
        match (inner.state(), &inner.frozen) {
            (CommandBufferState::Executable, Some(commands)) => Ok(Submission {
                commands: Arc::clone(commands),
                actions: inner.actions.clone(),
            }),
            (CommandBufferState::Pending, Some(commands)) if inner.simultaneous => Ok(Submission {
                commands: Arc::clone(commands),
                actions: inner.actions.clone(),
            }),
            (state, _) => Err(VulkanError::contract(format!(
                "cannot submit a command buffer in the {state:?} state"
            ))),
        }
    }

    /// Enter the pending state
    pub fn mark_pending(&self) {
        self.inner.lock().state = Some(CommandBufferState::Pending);
    }

    /// Leave the pending state after the submission completed
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.state() == CommandBufferState::Pending {
            inner.state = Some(if inner.one_time {
                CommandBufferState::Invalid
            } else {
                CommandBufferState::Executable
            });
        }
    }
}

impl std::fmt::Debug for CommandBufferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferObject")
            .field("level", &self.level)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// One `VkCommandPool`
#[derive(Debug)]
pub struct CommandPoolObject {
    /// Creation flags
    pub flags: vk::CommandPoolCreateFlags,
    /// Queue family the buffers are submitted to
    pub queue_family_index: u32,
    buffers: Mutex<Vec<vk::CommandBuffer>>,
}

impl CommandPoolObject {
    /// Empty pool
    pub fn new(info: &CommandPoolCreateInfo) -> Self {
        Self {
            flags: info.flags,
            queue_family_index: info.queue_family_index,
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Whether buffers may be reset individually
    pub fn allows_reset(&self) -> bool {
        self.flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Record an allocated buffer
    pub fn track(&self, buffer: vk::CommandBuffer) {
        self.buffers.lock().push(buffer);
    }

    /// Forget freed buffers
    pub fn untrack(&self, freed: &[vk::CommandBuffer]) {
        self.buffers.lock().retain(|buffer| !freed.contains(buffer));
    }

    /// Buffers currently allocated from the pool
    pub fn buffers(&self) -> Vec<vk::CommandBuffer> {
        self.buffers.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn primary(reset_allowed: bool) -> CommandBufferObject {
        CommandBufferObject::new(vk::CommandPool::null(), vk::CommandBufferLevel::PRIMARY, reset_allowed)
    }

    fn begin_pass() -> Command {
        Command::BeginRenderPass {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            area: vk::Rect2D::default(),
            clear_values: Vec::new(),
        }
    }

    fn draw() -> Command {
        Command::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }

    #[test]
    fn test_lifecycle() {
        let buffer = primary(false);
        assert_eq!(buffer.state(), CommandBufferState::Initial);
        assert!(buffer.record(draw()).is_err());
        assert!(buffer.end().is_err());
        assert!(buffer.submission().is_err());

        buffer.begin(&CommandBufferBeginInfo::default()).unwrap();
        assert!(buffer.begin(&CommandBufferBeginInfo::default()).is_err());
        buffer.begin_render_pass(begin_pass(), 1).unwrap();
        buffer.record(draw()).unwrap();
        buffer.record(Command::EndRenderPass).unwrap();
        buffer.end().unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Executable);
        assert_eq!(buffer.len(), 3);

        // Re-begin needs a pool that allows per-buffer reset
        assert!(buffer.begin(&CommandBufferBeginInfo::default()).is_err());

        let submission = buffer.submission().unwrap();
        assert_eq!(submission.commands.len(), 3);
        buffer.mark_pending();
        assert!(buffer.reset().is_err());
        assert!(buffer.submission().is_err());
        buffer.complete();
        assert_eq!(buffer.state(), CommandBufferState::Executable);

        buffer.reset().unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Initial);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_one_time_submit_invalidates() {
        let buffer = primary(true);
        buffer
            .begin(&CommandBufferBeginInfo {
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                inheritance: None,
            })
            .unwrap();
        buffer.end().unwrap();
        buffer.submission().unwrap();
        buffer.mark_pending();
        buffer.complete();
        assert_eq!(buffer.state(), CommandBufferState::Invalid);
        assert!(buffer.submission().is_err());

        buffer.begin(&CommandBufferBeginInfo::default()).unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_render_pass_scope() {
        let buffer = primary(false);
        buffer.begin(&CommandBufferBeginInfo::default()).unwrap();
        assert!(buffer.record(draw()).is_err());
        assert!(buffer.record(Command::EndRenderPass).is_err());

        buffer.begin_render_pass(begin_pass(), 2).unwrap();
        assert!(buffer.begin_render_pass(begin_pass(), 1).is_err());
        assert!(buffer
            .record(Command::Dispatch { x: 1, y: 1, z: 1 })
            .is_err());
        assert!(buffer.record(Command::EndRenderPass).is_err());
        assert!(buffer.end().is_err());

        buffer.record(Command::NextSubpass).unwrap();
        assert!(buffer.record(Command::NextSubpass).is_err());
        buffer.record(Command::EndRenderPass).unwrap();
        buffer.end().unwrap();
    }

    #[test]
    fn test_secondary_actions_spliced_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let tag = |n: usize| -> Action {
            let order = Arc::clone(&order);
            Arc::new(move || order.lock().push(n))
        };

        let secondary = Arc::new(CommandBufferObject::new(
            vk::CommandPool::null(),
            vk::CommandBufferLevel::SECONDARY,
            false,
        ));
        secondary.begin(&CommandBufferBeginInfo::default()).unwrap();
        secondary.add_action(tag(2)).unwrap();
        secondary.end().unwrap();

        let buffer = primary(false);
        buffer.begin(&CommandBufferBeginInfo::default()).unwrap();
        buffer.add_action(tag(1)).unwrap();
        buffer.execute(&[Arc::clone(&secondary)]).unwrap();
        buffer.add_action(tag(3)).unwrap();
        buffer.end().unwrap();

        let submission = buffer.submission().unwrap();
        assert!(matches!(&submission.commands[0], Command::ExecuteCommands(lists) if lists.len() == 1));
        for action in &submission.actions {
            action();
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_secondary_must_be_executable() {
        let secondary = Arc::new(CommandBufferObject::new(
            vk::CommandPool::null(),
            vk::CommandBufferLevel::SECONDARY,
            false,
        ));
        let buffer = primary(false);
        buffer.begin(&CommandBufferBeginInfo::default()).unwrap();
        assert!(buffer.execute(&[secondary]).is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        buffer
            .add_action(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        buffer.end().unwrap();
        for action in buffer.submission().unwrap().actions {
            action();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_tracks_buffers() {
        let pool = CommandPoolObject::new(&CommandPoolCreateInfo {
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: 0,
        });
        assert!(pool.allows_reset());
        use ash::vk::Handle;
        pool.track(vk::CommandBuffer::from_raw(1));
        pool.track(vk::CommandBuffer::from_raw(2));
        pool.untrack(&[vk::CommandBuffer::from_raw(1)]);
        assert_eq!(pool.buffers(), vec![vk::CommandBuffer::from_raw(2)]);
    }
}
