//! The geometry pool: materializes regular and meshlet meshes into backing
//! buffers behind stable [`fe::GeometryHandle`]s.

use std::mem;
use std::sync::Arc;

use arrayvec::ArrayVec;
use ferrum_jobs::WaitGroup;

use crate::device::Device;
use crate::fence::FenceSyncPoint;
use crate::pool::BitSet;
use crate::resource::Buffer;

#[derive(Clone)]
pub struct StreamBufferView {
    pub buffer: Arc<Buffer>,
    pub byte_offset: u64,
    pub byte_size: u64,
}

#[derive(Clone)]
pub struct IndexBufferView {
    pub buffer: Arc<Buffer>,
    pub byte_offset: u64,
    pub byte_size: u64,
    pub index_type: fe::IndexType,
}

/// What a draw needs from a regular geometry: one view per active stream,
/// packed densely in stream order.
#[derive(Clone)]
pub struct GeometryView {
    pub stream_buffer_views: ArrayVec<StreamBufferView, { fe::MAX_VERTEX_STREAMS }>,
    pub index_buffer_view: Option<IndexBufferView>,
    pub draw_arguments: fe::DrawArguments,
}

#[derive(Clone)]
pub struct MeshletGeometryView {
    pub vertex_buffer_view: StreamBufferView,
    pub index_buffer_view: IndexBufferView,
    pub primitive_buffer_view: StreamBufferView,
    pub meshlet_buffer_view: StreamBufferView,
    pub meshlet_count: u32,
}

pub struct GeometryAllocationDesc<'a> {
    pub name: &'a str,
    pub input_layout: fe::InputLayout,
    pub vertex_count: u32,
    pub index_count: u32,
    pub index_type: fe::IndexType,
    /// Non-zero turns the allocation into meshlet geometry.
    pub meshlet_count: u32,
    pub primitive_count: u32,
}

enum GeometryEntry {
    Vacant,
    Regular(GeometryView),
    Meshlet(MeshletGeometryView),
}

/// Dense array of geometry entries with a bit-set free list. Entries never
/// move; handles stay valid until the explicit free.
pub struct GeometryPool {
    device: Device,
    entries: Vec<GeometryEntry>,
    free_entries: BitSet,
    allocated_entries: BitSet,
    /// Allocation is synchronous, so availability is born signaled.
    ready_wait_group: Arc<WaitGroup>,
}

impl GeometryPool {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            entries: Vec::new(),
            free_entries: BitSet::default(),
            allocated_entries: BitSet::default(),
            ready_wait_group: WaitGroup::signaled(),
        }
    }

    pub fn allocate(
        &mut self,
        desc: &GeometryAllocationDesc<'_>,
    ) -> Result<fe::GeometryHandle, fe::ErrorKind> {
        profiling::scope!("GeometryPool::allocate");

        if desc.vertex_count == 0 {
            return Err(fe::ErrorKind::InvalidArgument("geometry needs vertices"));
        }

        let is_meshlet = desc.meshlet_count > 0;
        if is_meshlet {
            if desc.index_count == 0 || desc.primitive_count == 0 {
                return Err(fe::ErrorKind::InvalidArgument(
                    "meshlet geometry needs indices and primitives",
                ));
            }
        } else if desc.primitive_count != 0 {
            return Err(fe::ErrorKind::InvalidArgument(
                "primitive count is only valid for meshlet geometry",
            ));
        }

        let vertex_bind_flags = if is_meshlet {
            fe::BufferBindFlags::UNORDERED_ACCESS
        } else {
            fe::BufferBindFlags::VERTEX_BUFFER
        };

        // One buffer per active stream, sized stride * vertex_count.
        let mut stream_views: ArrayVec<StreamBufferView, { fe::MAX_VERTEX_STREAMS }> =
            ArrayVec::new();
        let active_mask = desc.input_layout.active_stream_mask();
        for stream in 0..fe::MAX_VERTEX_STREAMS as u8 {
            if active_mask & 1 << stream == 0 {
                continue;
            }
            let byte_size =
                u64::from(desc.input_layout.stream_stride(stream)) * u64::from(desc.vertex_count);
            let buffer = self.device.create_buffer(
                &format!("VertexBuffer_{}", desc.name),
                &fe::BufferDesc::new(byte_size, vertex_bind_flags, fe::ResourceUsage::DeviceOnly),
            )?;
            stream_views.push(StreamBufferView {
                buffer,
                byte_offset: 0,
                byte_size,
            });
        }

        let mut index_view = None;
        let draw_arguments;
        if desc.index_count > 0 {
            let byte_size = u64::from(desc.index_type.byte_size()) * u64::from(desc.index_count);
            let bind_flags = if is_meshlet {
                fe::BufferBindFlags::UNORDERED_ACCESS
            } else {
                fe::BufferBindFlags::INDEX_BUFFER
            };
            let buffer = self.device.create_buffer(
                &format!("IndexBuffer_{}", desc.name),
                &fe::BufferDesc::new(byte_size, bind_flags, fe::ResourceUsage::DeviceOnly),
            )?;
            index_view = Some(IndexBufferView {
                buffer,
                byte_offset: 0,
                byte_size,
                index_type: desc.index_type,
            });
            draw_arguments = fe::DrawArguments::Indexed {
                start_index: 0,
                base_vertex: 0,
                index_count: desc.index_count,
            };
        } else {
            draw_arguments = fe::DrawArguments::Linear {
                start_vertex: 0,
                vertex_count: desc.vertex_count,
            };
        }

        let entry = if is_meshlet {
            if stream_views.len() != 1 {
                return Err(fe::ErrorKind::InvalidArgument(
                    "meshlet geometry requires a single interleaved vertex stream",
                ));
            }

            let primitives_size =
                u64::from(desc.primitive_count) * mem::size_of::<fe::PackedTriangle>() as u64;
            let primitives_buffer = self.device.create_buffer(
                &format!("Primitives_{}", desc.name),
                &fe::BufferDesc::new(
                    primitives_size,
                    fe::BufferBindFlags::UNORDERED_ACCESS,
                    fe::ResourceUsage::DeviceOnly,
                ),
            )?;

            let meshlets_size =
                u64::from(desc.meshlet_count) * mem::size_of::<fe::MeshletHeader>() as u64;
            let meshlets_buffer = self.device.create_buffer(
                &format!("Meshlets_{}", desc.name),
                &fe::BufferDesc::new(
                    meshlets_size,
                    fe::BufferBindFlags::UNORDERED_ACCESS,
                    fe::ResourceUsage::DeviceOnly,
                ),
            )?;

            GeometryEntry::Meshlet(MeshletGeometryView {
                vertex_buffer_view: stream_views.into_iter().next().unwrap(),
                index_buffer_view: index_view.unwrap(),
                primitive_buffer_view: StreamBufferView {
                    buffer: primitives_buffer,
                    byte_offset: 0,
                    byte_size: primitives_size,
                },
                meshlet_buffer_view: StreamBufferView {
                    buffer: meshlets_buffer,
                    byte_offset: 0,
                    byte_size: meshlets_size,
                },
                meshlet_count: desc.meshlet_count,
            })
        } else {
            GeometryEntry::Regular(GeometryView {
                stream_buffer_views: stream_views,
                index_buffer_view: index_view,
                draw_arguments,
            })
        };

        let index = match self.free_entries.find_first_set() {
            Some(index) => {
                self.free_entries.set(index, false);
                self.entries[index as usize] = entry;
                index
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(entry);
                index
            }
        };
        self.allocated_entries.set(index, true);

        Ok(fe::GeometryHandle(index))
    }

    /// Releases the entry's buffer references immediately. The caller must
    /// guarantee the GPU is done with them; otherwise use
    /// [`Self::free_deferred`].
    pub fn free(&mut self, handle: fe::GeometryHandle) {
        if !handle.is_valid() {
            return;
        }
        let index = handle.0;
        let entry = mem::replace(&mut self.entries[index as usize], GeometryEntry::Vacant);
        drop(entry);
        self.free_entries.set(index, true);
        self.allocated_entries.set(index, false);
    }

    /// Releases the slot now but parks the buffer references on the device
    /// until `sync` is reached.
    pub fn free_deferred(&mut self, handle: fe::GeometryHandle, sync: FenceSyncPoint) {
        if !handle.is_valid() {
            return;
        }
        let index = handle.0;
        let entry = mem::replace(&mut self.entries[index as usize], GeometryEntry::Vacant);
        self.device.retire(sync, entry);
        self.free_entries.set(index, true);
        self.allocated_entries.set(index, false);
    }

    /// The draw view of a regular geometry. Asking for the wrong flavor is
    /// a precondition failure.
    pub fn get_view(&self, handle: fe::GeometryHandle) -> GeometryView {
        match &self.entries[handle.0 as usize] {
            GeometryEntry::Regular(view) => view.clone(),
            GeometryEntry::Meshlet(_) => panic!("geometry {handle} is a meshlet geometry"),
            GeometryEntry::Vacant => panic!("geometry {handle} was freed"),
        }
    }

    pub fn get_meshlet_view(&self, handle: fe::GeometryHandle) -> MeshletGeometryView {
        match &self.entries[handle.0 as usize] {
            GeometryEntry::Meshlet(view) => view.clone(),
            GeometryEntry::Regular(_) => panic!("geometry {handle} is a regular geometry"),
            GeometryEntry::Vacant => panic!("geometry {handle} was freed"),
        }
    }

    /// A group the caller may block on before first use.
    pub fn get_availability_wait_group(&self, _handle: fe::GeometryHandle) -> Arc<WaitGroup> {
        // TODO: async allocation would hand out a real per-entry group here.
        Arc::clone(&self.ready_wait_group)
    }

    pub fn allocated_count(&self) -> u32 {
        self.allocated_entries.count_set()
    }
}

impl Drop for GeometryPool {
    fn drop(&mut self) {
        debug_assert!(
            self.allocated_entries.count_set() == 0,
            "geometry not freed"
        );
    }
}
