//! Record-then-submit scenarios run against the no-op backend

mod common;

use common::{Fixture, HOST_VISIBLE, TARGET};
use vkgl::backends::noop::GlCall;
use vkgl::core::info::{
    ClearColorValue, ClearValue, CommandBufferAllocateInfo, CommandBufferBeginInfo,
    FenceCreateInfo, RenderPassBeginInfo, SubmitInfo,
};
use vkgl::vk;

const TRIANGLE: [[f32; 4]; 3] = [
    [0.0, -0.5, 0.0, 1.0],
    [0.5, 0.5, 0.0, 1.0],
    [-0.5, 0.5, 0.0, 1.0],
];

const CLEAR: [ClearValue; 1] = [ClearValue::Color(ClearColorValue::Float([0.0, 0.0, 0.0, 1.0]))];

fn render_area() -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: TARGET,
    }
}

/// Begin pass, bind, draw one triangle, end pass
fn record_triangle(
    fixture: &Fixture,
    target: &common::Target,
    pipeline: vk::Pipeline,
    vertices: vk::Buffer,
) -> vk::CommandBuffer {
    record_triangle_from(fixture, target, pipeline, &[vertices], &[0])
}

fn record_triangle_from(
    fixture: &Fixture,
    target: &common::Target,
    pipeline: vk::Pipeline,
    vertex_buffers: &[vk::Buffer],
    offsets: &[vk::DeviceSize],
) -> vk::CommandBuffer {
    let device = &fixture.device;
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    device
        .cmd_begin_render_pass(
            buffer,
            &RenderPassBeginInfo {
                render_pass: target.render_pass,
                framebuffer: target.framebuffer,
                render_area: render_area(),
                clear_values: &CLEAR,
            },
            vk::SubpassContents::INLINE,
        )
        .unwrap();
    device
        .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        .unwrap();
    device
        .cmd_bind_vertex_buffers(buffer, 0, vertex_buffers, offsets)
        .unwrap();
    device.cmd_draw(buffer, 3, 1, 0, 0).unwrap();
    device.cmd_end_render_pass(buffer).unwrap();
    device.end_command_buffer(buffer).unwrap();
    buffer
}

#[test]
fn test_identical_recordings_share_state_and_vertex_array() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let layout = fixture.empty_layout();
    let pipeline = fixture.pipeline(target.render_pass, layout);
    let vertices = fixture.vertex_buffer(&TRIANGLE);

    let first = record_triangle(&fixture, &target, pipeline, vertices);
    let second = record_triangle(&fixture, &target, pipeline, vertices);

    fixture.submit(&[first]).unwrap();
    let after_first = fixture.device.engine_stats().unwrap();
    assert!(after_first.last_bind_calls > 0);
    assert_eq!(after_first.geometry_entries, 1);

    fixture.submit(&[second]).unwrap();
    let after_second = fixture.device.engine_stats().unwrap();
    assert_eq!(after_second.pipeline_binds, 2);
    assert_eq!(after_second.last_bind_calls, 0);
    assert_eq!(after_second.geometry_entries, 1);
    assert_eq!(after_second.geometry_hits, 1);

    let calls = fixture.probe.calls();
    assert_eq!(calls.count(GlCall::is_draw), 2);
    assert_eq!(calls.count(|call| matches!(call, GlCall::CreateVertexArray(_))), 1);
}

#[test]
fn test_two_binding_recordings_share_one_vertex_array() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let layout = fixture.empty_layout();
    let pipeline = fixture.pipeline_with_bindings(target.render_pass, layout, 2);
    let a = fixture.vertex_buffer(&TRIANGLE);
    let mut shifted = vec![[0.0; 4]];
    shifted.extend_from_slice(&TRIANGLE);
    let b = fixture.vertex_buffer(&shifted);

    let first = record_triangle_from(&fixture, &target, pipeline, &[a, b], &[0, 16]);
    let second = record_triangle_from(&fixture, &target, pipeline, &[a, b], &[0, 16]);

    fixture.submit(&[first]).unwrap();
    let after_first = fixture.device.engine_stats().unwrap();
    assert!(after_first.last_bind_calls > 0);
    assert_eq!(after_first.geometry_entries, 1);

    fixture.submit(&[second]).unwrap();
    let after_second = fixture.device.engine_stats().unwrap();
    assert_eq!(after_second.last_bind_calls, 0);
    assert_eq!(after_second.geometry_entries, 1);
    assert_eq!(after_second.geometry_hits, 1);

    // A different offset for B is a different binding combination
    let moved = record_triangle_from(&fixture, &target, pipeline, &[a, b], &[0, 32]);
    fixture.submit(&[moved]).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 2);
}

#[test]
fn test_destroying_second_binding_purges_its_vertex_array() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let layout = fixture.empty_layout();
    let pipeline = fixture.pipeline_with_bindings(target.render_pass, layout, 2);
    let a = fixture.vertex_buffer(&TRIANGLE);
    let mut shifted = vec![[0.0; 4]];
    shifted.extend_from_slice(&TRIANGLE);
    let b = fixture.vertex_buffer(&shifted);

    let buffer = record_triangle_from(&fixture, &target, pipeline, &[a, b], &[0, 16]);
    fixture.submit(&[buffer]).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 1);

    fixture.device.destroy_buffer(b).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 0);
    assert_eq!(
        fixture
            .probe
            .calls()
            .count(|call| matches!(call, GlCall::DeleteVertexArray(_))),
        1
    );

    // A still works with a fresh B
    let fresh = fixture.vertex_buffer(&shifted);
    let again = record_triangle_from(&fixture, &target, pipeline, &[a, fresh], &[0, 16]);
    fixture.submit(&[again]).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 1);
}

#[test]
fn test_clear_count_mismatch_is_rejected_before_the_driver() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    let calls_before = fixture.probe.calls().len();

    let err = fixture
        .device
        .cmd_begin_render_pass(
            buffer,
            &RenderPassBeginInfo {
                render_pass: target.render_pass,
                framebuffer: target.framebuffer,
                render_area: render_area(),
                clear_values: &[],
            },
            vk::SubpassContents::INLINE,
        )
        .unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(fixture.probe.calls().len(), calls_before);

    // The buffer is still recording and the pass can begin with the right count
    fixture
        .device
        .cmd_begin_render_pass(
            buffer,
            &RenderPassBeginInfo {
                render_pass: target.render_pass,
                framebuffer: target.framebuffer,
                render_area: render_area(),
                clear_values: &CLEAR,
            },
            vk::SubpassContents::INLINE,
        )
        .unwrap();
}

#[test]
fn test_device_copy_is_visible_on_next_map() {
    let fixture = Fixture::new();
    let device = &fixture.device;
    let (src, src_memory) = fixture.buffer(16, vk::BufferUsageFlags::TRANSFER_SRC, HOST_VISIBLE);
    let (dst, dst_memory) = fixture.buffer(16, vk::BufferUsageFlags::TRANSFER_DST, HOST_VISIBLE);
    {
        let mut mapped = device.map_memory(src_memory, 0, vk::WHOLE_SIZE).unwrap();
        mapped.write_slice(0, &[1u32, 2, 3, 4]).unwrap();
    }

    let buffer = fixture.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device
        .cmd_copy_buffer(
            buffer,
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            }],
        )
        .unwrap();
    device.end_command_buffer(buffer).unwrap();
    fixture.submit(&[buffer]).unwrap();

    let mapped = device.map_memory(dst_memory, 0, vk::WHOLE_SIZE).unwrap();
    assert_eq!(mapped.read_slice::<u32>(0, 4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(
        fixture
            .probe
            .calls()
            .count(|call| matches!(call, GlCall::GetBufferSubData { .. })),
        1
    );
}

#[test]
fn test_secondary_fill_runs_inside_primary() {
    let fixture = Fixture::new();
    let device = &fixture.device;
    let (target, memory) = fixture.buffer(32, vk::BufferUsageFlags::TRANSFER_DST, HOST_VISIBLE);

    let secondary = device
        .allocate_command_buffers(&CommandBufferAllocateInfo {
            command_pool: fixture.pool,
            level: vk::CommandBufferLevel::SECONDARY,
            command_buffer_count: 1,
        })
        .unwrap()[0];
    device
        .begin_command_buffer(secondary, &CommandBufferBeginInfo::default())
        .unwrap();
    device
        .cmd_fill_buffer(secondary, target, 0, vk::WHOLE_SIZE, 0xABAB_ABAB)
        .unwrap();
    device.end_command_buffer(secondary).unwrap();

    let primary = fixture.begin(vk::CommandBufferUsageFlags::empty());
    device.cmd_execute_commands(primary, &[secondary]).unwrap();
    device.end_command_buffer(primary).unwrap();

    // Secondaries only run through a primary
    assert!(fixture.submit(&[secondary]).unwrap_err().is_contract_violation());
    fixture.submit(&[primary]).unwrap();

    let mapped = device.map_memory(memory, 0, vk::WHOLE_SIZE).unwrap();
    assert_eq!(mapped.read_slice::<u32>(0, 8).unwrap(), vec![0xABAB_ABAB; 8]);
}

#[test]
fn test_destroying_vertex_buffer_purges_vertex_array() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let layout = fixture.empty_layout();
    let pipeline = fixture.pipeline(target.render_pass, layout);
    let vertices = fixture.vertex_buffer(&TRIANGLE);

    let buffer = record_triangle(&fixture, &target, pipeline, vertices);
    fixture.submit(&[buffer]).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 1);

    fixture.device.destroy_buffer(vertices).unwrap();
    assert_eq!(fixture.device.engine_stats().unwrap().geometry_entries, 0);
    assert_eq!(
        fixture
            .probe
            .calls()
            .count(|call| matches!(call, GlCall::DeleteVertexArray(_))),
        1
    );

    // The recording still names the destroyed buffer and now fails at replay
    let err = fixture.submit(&[buffer]).unwrap_err();
    assert!(matches!(err, vkgl::core::VulkanError::ResourceNotFound { .. }));
}

#[test]
fn test_one_time_buffer_cannot_be_resubmitted() {
    let fixture = Fixture::new();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    fixture.device.end_command_buffer(buffer).unwrap();

    fixture.submit(&[buffer]).unwrap();
    assert!(fixture.submit(&[buffer]).unwrap_err().is_contract_violation());

    // Resetting brings it back to the initial state
    fixture.device.reset_command_buffer(buffer).unwrap();
    fixture
        .device
        .begin_command_buffer(buffer, &CommandBufferBeginInfo::default())
        .unwrap();
    fixture.device.end_command_buffer(buffer).unwrap();
    fixture.submit(&[buffer]).unwrap();
}

#[test]
fn test_failed_replay_leaves_fence_unsignaled() {
    let fixture = Fixture::new();
    let device = &fixture.device;
    let target = fixture.target();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    device
        .cmd_begin_render_pass(
            buffer,
            &RenderPassBeginInfo {
                render_pass: target.render_pass,
                framebuffer: target.framebuffer,
                render_area: render_area(),
                clear_values: &CLEAR,
            },
            vk::SubpassContents::INLINE,
        )
        .unwrap();
    // No pipeline is bound, which only replay can notice
    device.cmd_draw(buffer, 3, 1, 0, 0).unwrap();
    device.cmd_end_render_pass(buffer).unwrap();
    device.end_command_buffer(buffer).unwrap();

    let fence = device.create_fence(&FenceCreateInfo::default()).unwrap();
    let err = device
        .queue_submit(
            fixture.queue,
            &[SubmitInfo {
                command_buffers: &[buffer],
                ..SubmitInfo::default()
            }],
            fence,
        )
        .unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(device.get_fence_status(fence).unwrap(), vk::Result::NOT_READY);
    assert_eq!(fixture.probe.calls().count(GlCall::is_draw), 0);
}

#[test]
fn test_failed_replay_returns_buffer_to_executable() {
    let fixture = Fixture::new();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    fixture.device.cmd_dispatch(buffer, 1, 1, 1).unwrap();
    fixture.device.end_command_buffer(buffer).unwrap();

    assert!(fixture.submit(&[buffer]).is_err());
    fixture.device.reset_command_buffer(buffer).unwrap();
    fixture
        .device
        .begin_command_buffer(buffer, &CommandBufferBeginInfo::default())
        .unwrap();
}

#[test]
fn test_clear_past_the_last_mip_level_is_rejected_when_recorded() {
    let fixture = Fixture::new();
    let target = fixture.target();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    let range = |level_count| vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    };
    let clear = |level_count| {
        fixture.device.cmd_clear_color_image(
            buffer,
            target.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ClearColorValue::Float([1.0, 0.0, 0.0, 1.0]),
            &[range(level_count)],
        )
    };

    assert!(clear(40).unwrap_err().is_contract_violation());
    clear(vk::REMAINING_MIP_LEVELS).unwrap();
    fixture.device.end_command_buffer(buffer).unwrap();
    fixture.submit(&[buffer]).unwrap();

    // The buffer went back to executable and can be re-recorded
    fixture.device.reset_command_buffer(buffer).unwrap();
}

#[test]
fn test_viewport_slots_are_bounded_when_recorded() {
    let fixture = Fixture::new();
    let buffer = fixture.begin(vk::CommandBufferUsageFlags::empty());
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: TARGET.width as f32,
        height: TARGET.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let device = &fixture.device;

    assert!(device
        .cmd_set_viewport(buffer, 5_000_000, &[viewport])
        .unwrap_err()
        .is_contract_violation());
    assert!(device.cmd_set_viewport(buffer, u32::MAX, &[viewport]).is_err());
    device.cmd_set_viewport(buffer, 0, &[viewport]).unwrap();

    let far = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: i32::MAX },
        extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
    };
    assert!(device.cmd_set_scissor(buffer, 0, &[far]).is_err());
    device.cmd_set_scissor(buffer, 0, &[render_area()]).unwrap();
}
