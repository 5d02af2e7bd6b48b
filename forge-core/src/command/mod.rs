mod allocator;

pub(crate) use allocator::CommandAllocator;

use std::{fmt, mem::ManuallyDrop, ops::Range, sync::Arc, thread::ThreadId};

use hal::CommandBuffer as _;

use crate::{
    device::Device,
    hal_api::HalApi,
    resource::{Buffer, ComputePipeline, DescriptorSet, GraphicsPipeline, RenderTarget},
    resource_log,
    sync::SyncPoint,
    DeviceError, QueueType, SubmissionIndex,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandBufferState {
    /// Allocated or submitted, not open for recording.
    Initial,
    Recording,
    /// Closed and ready to be submitted.
    Executable,
}

/// A command buffer allocated from the pool of the thread that created it.
///
/// Dropping the buffer returns it to that pool.
pub struct CommandBuffer<A: HalApi> {
    raw: ManuallyDrop<A::CommandBuffer>,
    device: Arc<Device<A>>,
    queue_type: QueueType,
    owner: ThreadId,
    label: String,
    state: CommandBufferState,
    in_render_pass: bool,
}

impl<A: HalApi> fmt::Debug for CommandBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("queue_type", &self.queue_type)
            .field("state", &self.state)
            .finish()
    }
}

impl<A: HalApi> CommandBuffer<A> {
    pub(crate) fn new(
        raw: A::CommandBuffer,
        device: Arc<Device<A>>,
        queue_type: QueueType,
        owner: ThreadId,
        label: String,
    ) -> Self {
        CommandBuffer {
            raw: ManuallyDrop::new(raw),
            device,
            queue_type,
            owner,
            label,
            state: CommandBufferState::Initial,
            in_render_pass: false,
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    pub fn is_executable(&self) -> bool {
        self.state == CommandBufferState::Executable
    }

    pub fn raw(&self) -> &A::CommandBuffer {
        &self.raw
    }

    /// # Safety
    ///
    /// Commands recorded on the raw buffer bypass every check of this type.
    pub unsafe fn raw_mut(&mut self) -> &mut A::CommandBuffer {
        &mut self.raw
    }

    fn assert_recording(&self) {
        assert!(
            self.is_recording(),
            "command buffer {:?} is not recording",
            self.label
        );
    }

    /// Reset the buffer and open it for recording.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already recording.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        profiling::scope!("CommandBuffer::begin");
        assert!(
            !self.is_recording(),
            "command buffer {:?} is already recording",
            self.label
        );
        unsafe { self.raw.begin(Some(&self.label))? };
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Close the buffer so it can be submitted.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not recording, or a render pass is still open.
    pub fn end(&mut self) -> Result<(), DeviceError> {
        self.assert_recording();
        assert!(
            !self.in_render_pass,
            "command buffer {:?} closed inside a render pass",
            self.label
        );
        unsafe { self.raw.end()? };
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Mark a closed buffer as handed to the device.
    pub(crate) fn mark_submitted(&mut self) {
        self.state = CommandBufferState::Initial;
    }

    pub fn fill_buffer(&mut self, buffer: &Buffer<A>, range: hal::MemoryRange, value: u8) {
        self.assert_recording();
        assert!(
            range.start <= range.end && range.end <= buffer.size(),
            "fill range {:?} is outside of buffer {:?}",
            range,
            buffer.label()
        );
        unsafe { self.raw.fill_buffer(buffer.raw(), range, value) };
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &Buffer<A>,
        dst: &Buffer<A>,
        regions: &[hal::BufferCopy],
    ) {
        self.assert_recording();
        for region in regions {
            assert!(
                region.src_offset + region.size <= src.size()
                    && region.dst_offset + region.size <= dst.size(),
                "copy region {:?} is out of bounds",
                region
            );
        }
        unsafe { self.raw.copy_buffer_to_buffer(src.raw(), dst.raw(), regions) };
    }

    pub fn begin_render_pass(&mut self, target: &RenderTarget<A>, clear: Option<[f32; 4]>) {
        self.assert_recording();
        assert!(!self.in_render_pass, "render passes can't be nested");
        self.in_render_pass = true;
        unsafe { self.raw.begin_render_pass(target.raw(), clear) };
    }

    pub fn end_render_pass(&mut self) {
        self.assert_recording();
        assert!(self.in_render_pass, "no render pass is open");
        self.in_render_pass = false;
        unsafe { self.raw.end_render_pass() };
    }

    pub fn set_compute_pipeline(&mut self, pipeline: &ComputePipeline<A>) {
        self.assert_recording();
        unsafe { self.raw.set_compute_pipeline(pipeline.raw()) };
    }

    pub fn set_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline<A>) {
        self.assert_recording();
        unsafe { self.raw.set_graphics_pipeline(pipeline.raw()) };
    }

    /// Bind every descriptor table of `set`.
    pub fn set_descriptor_set(&mut self, set: &DescriptorSet<A>) {
        self.assert_recording();
        for (ty, table) in set.tables() {
            unsafe { self.raw.set_descriptor_table(ty, table.ptr()) };
        }
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.assert_recording();
        assert!(self.in_render_pass, "draws must be inside a render pass");
        unsafe { self.raw.draw(vertices, instances) };
    }

    pub fn dispatch(&mut self, count: [u32; 3]) {
        self.assert_recording();
        unsafe { self.raw.dispatch(count) };
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        self.assert_recording();
        unsafe { self.raw.insert_debug_marker(label) };
    }
}

impl<A: HalApi> Drop for CommandBuffer<A> {
    fn drop(&mut self) {
        resource_log!("Release command buffer {:?}", self.label);
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        self.device
            .command_allocator
            .release(self.owner, self.queue_type, raw);
    }
}

/// A command buffer and the sync point its submissions signal.
///
/// Units cycle between a task queue worker's open slot and its recycle FIFO,
/// and are only reopened once the device has finished their last submission.
pub(crate) struct ExecutionUnit<A: HalApi> {
    pub(crate) cmd_buf: CommandBuffer<A>,
    pub(crate) sync_point: Arc<SyncPoint<A>>,
    pub(crate) last_submitted: SubmissionIndex,
}

impl<A: HalApi> ExecutionUnit<A> {
    pub(crate) fn new(cmd_buf: CommandBuffer<A>, sync_point: Arc<SyncPoint<A>>) -> Self {
        ExecutionUnit {
            cmd_buf,
            sync_point,
            last_submitted: 0,
        }
    }

    /// Whether the device is done with everything submitted from this unit.
    pub(crate) fn is_reusable(&self) -> bool {
        self.sync_point.is_complete(self.last_submitted)
    }
}
