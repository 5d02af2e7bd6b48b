use super::{
    Buffer, ComputePipeline, DeviceShared, GraphicsPipeline, ObjectKind, RenderTarget, Storage,
};
use crate::{DescriptorAddress, MessageSeverity};

use std::{ops::Range, sync::Arc};

#[derive(Debug)]
pub struct CommandPool {
    shared: Arc<DeviceShared>,
    queue_type: crate::QueueType,
    outstanding: usize,
}

impl CommandPool {
    pub(super) fn new(shared: Arc<DeviceShared>, queue_type: crate::QueueType) -> Self {
        CommandPool {
            shared,
            queue_type,
            outstanding: 0,
        }
    }

    pub fn queue_type(&self) -> crate::QueueType {
        self.queue_type
    }

    /// Number of buffers allocated from this pool and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl crate::CommandPool<super::Api> for CommandPool {
    unsafe fn allocate(&mut self, label: crate::Label) -> Result<CommandBuffer, crate::DeviceError> {
        self.shared.check_lost()?;
        self.outstanding += 1;
        self.shared.counters.add(ObjectKind::CommandBuffer);
        Ok(CommandBuffer {
            id: self.shared.make_id(),
            label: label.map(str::to_string),
            state: State::Initial,
            commands: Vec::new(),
        })
    }

    unsafe fn free(&mut self, _command_buffer: CommandBuffer) {
        self.outstanding -= 1;
        self.shared.counters.remove(ObjectKind::CommandBuffer);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
enum Command {
    Fill {
        dst: Storage,
        range: crate::MemoryRange,
        value: u8,
    },
    Copy {
        src: Storage,
        dst: Storage,
        regions: Vec<crate::BufferCopy>,
    },
    BeginRenderPass {
        target: u64,
    },
    EndRenderPass,
    SetPipeline(u64),
    SetDescriptorTable(crate::DescriptorType, DescriptorAddress),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Dispatch([u32; 3]),
    Marker(String),
}

#[derive(Debug)]
pub struct CommandBuffer {
    id: u64,
    label: Option<String>,
    state: State,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_executable(&self) -> bool {
        self.state == State::Executable
    }

    fn push(&mut self, command: Command) {
        debug_assert_eq!(
            self.state,
            State::Recording,
            "command buffer {:?} is not recording",
            self.label
        );
        self.commands.push(command);
    }

    pub(super) fn execute(&self, shared: &DeviceShared) {
        if self.state != State::Executable {
            shared.validate(
                MessageSeverity::Error,
                &format!("submitted command buffer {:?} is not executable", self.label),
            );
            return;
        }
        for command in self.commands.iter() {
            match *command {
                Command::Fill {
                    ref dst,
                    ref range,
                    value,
                } => {
                    let mut data = dst.lock();
                    let end = (range.end as usize).min(data.len());
                    let start = (range.start as usize).min(end);
                    for byte in data[start..end].iter_mut() {
                        *byte = value;
                    }
                }
                Command::Copy {
                    ref src,
                    ref dst,
                    ref regions,
                } => {
                    if Arc::ptr_eq(src, dst) {
                        let mut data = src.lock();
                        for region in regions {
                            let from = region.src_offset as usize;
                            let len = region.size as usize;
                            data.copy_within(from..from + len, region.dst_offset as usize);
                        }
                    } else {
                        let src = src.lock();
                        let mut dst = dst.lock();
                        for region in regions {
                            let from = region.src_offset as usize;
                            let to = region.dst_offset as usize;
                            let len = region.size as usize;
                            dst[to..to + len].copy_from_slice(&src[from..from + len]);
                        }
                    }
                }
                Command::Marker(ref label) => shared.markers.lock().push(label.clone()),
                Command::Dispatch(count) => {
                    log::trace!("soft dispatch {:?}", count);
                }
                Command::Draw {
                    ref vertices,
                    ref instances,
                } => {
                    log::trace!("soft draw {:?} x {:?}", vertices, instances);
                }
                Command::BeginRenderPass { target } => {
                    log::trace!("soft render pass into target {}", target);
                }
                Command::EndRenderPass => {}
                Command::SetPipeline(id) => log::trace!("soft pipeline {}", id),
                Command::SetDescriptorTable(ty, base) => {
                    log::trace!("soft {:?} table at {:#x}", ty, base);
                }
            }
        }
    }
}

impl crate::CommandBuffer<super::Api> for CommandBuffer {
    unsafe fn begin(&mut self, label: crate::Label) -> Result<(), crate::DeviceError> {
        if let Some(label) = label {
            self.label = Some(label.to_string());
        }
        self.commands.clear();
        self.state = State::Recording;
        Ok(())
    }

    unsafe fn end(&mut self) -> Result<(), crate::DeviceError> {
        debug_assert_eq!(self.state, State::Recording);
        self.state = State::Executable;
        Ok(())
    }

    unsafe fn fill_buffer(&mut self, buffer: &Buffer, range: crate::MemoryRange, value: u8) {
        self.push(Command::Fill {
            dst: Arc::clone(&buffer.data),
            range,
            value,
        });
    }

    unsafe fn copy_buffer_to_buffer(
        &mut self,
        src: &Buffer,
        dst: &Buffer,
        regions: &[crate::BufferCopy],
    ) {
        self.push(Command::Copy {
            src: Arc::clone(&src.data),
            dst: Arc::clone(&dst.data),
            regions: regions.to_vec(),
        });
    }

    unsafe fn begin_render_pass(&mut self, target: &RenderTarget, _clear: Option<[f32; 4]>) {
        self.push(Command::BeginRenderPass { target: target.id });
    }
    unsafe fn end_render_pass(&mut self) {
        self.push(Command::EndRenderPass);
    }

    unsafe fn set_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        self.push(Command::SetPipeline(pipeline.id));
    }
    unsafe fn set_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        self.push(Command::SetPipeline(pipeline.id));
    }
    unsafe fn set_descriptor_table(&mut self, ty: crate::DescriptorType, base: DescriptorAddress) {
        self.push(Command::SetDescriptorTable(ty, base));
    }

    unsafe fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.push(Command::Draw {
            vertices,
            instances,
        });
    }
    unsafe fn dispatch(&mut self, count: [u32; 3]) {
        self.push(Command::Dispatch(count));
    }

    unsafe fn insert_debug_marker(&mut self, label: &str) {
        self.push(Command::Marker(label.to_string()));
    }
}
