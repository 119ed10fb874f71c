use std::num::NonZeroU32;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use log::{debug, error, info};
use wgpu::util::DeviceExt;
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use threaded_mandelbrot::{
    engine::{Engine, Shared, ViewState, DEFAULT_MAX_ITERATIONS},
    framebuffer::PixelBuffer,
    input::{self, Key, KeyStates},
    tile::TilePlan,
    viewport::Viewport,
};

/// Time between presenter ticks. Redraws arriving faster than this are
/// dropped rather than presented.
const PRESENT_DELAY: Duration = Duration::from_millis(50);

/// Uniform consumed by `shader.wgsl`: the surface size in pixels and the
/// raster size in texels.
#[repr(C)]
#[derive(Pod, Zeroable, Clone, Copy, Debug)]
struct ScreenSize {
    surface: [f32; 2],
    frame: [f32; 2],
}

/// The worker grid is fixed for the lifetime of the process. A 3x3 grid
/// keeps per-tile work coarse enough that per-generation spawn overhead
/// stays negligible; machines with plenty of cores get a 4x4 grid.
fn choose_tile_grid() -> (usize, usize) {
    if num_cpus::get() >= 16 {
        (4, 4)
    } else {
        (3, 3)
    }
}

fn map_key(keycode: VirtualKeyCode) -> Option<Key> {
    match keycode {
        VirtualKeyCode::Up => Some(Key::ZoomIn),
        VirtualKeyCode::Down => Some(Key::ZoomOut),
        VirtualKeyCode::W => Some(Key::PanUp),
        VirtualKeyCode::A => Some(Key::PanLeft),
        VirtualKeyCode::S => Some(Key::PanDown),
        VirtualKeyCode::D => Some(Key::PanRight),
        VirtualKeyCode::Equals | VirtualKeyCode::NumpadAdd => Some(Key::IterationsUp),
        VirtualKeyCode::Minus | VirtualKeyCode::NumpadSubtract => Some(Key::IterationsDown),
        VirtualKeyCode::Space => Some(Key::Snapshot),
        _ => None,
    }
}

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Max Iterations: 768")
        .with_inner_size(LogicalSize::new(1024.0, 768.0))
        .build(&event_loop)
        .unwrap();

    let size = window.inner_size();
    let frame_width = size.width as usize;
    let frame_height = size.height as usize;

    let (tiles_x, tiles_y) = choose_tile_grid();
    let plan = match TilePlan::new(tiles_x, tiles_y, frame_width, frame_height) {
        Ok(plan) => plan,
        Err(err) => {
            error!("{}, stopping execution", err);
            return;
        }
    };
    info!(
        "computing {}x{} pixels across a {}x{} tile grid",
        frame_width, frame_height, tiles_x, tiles_y
    );

    let frame = Arc::new(PixelBuffer::new(frame_width, frame_height));
    let shared = Arc::new(Shared::new(ViewState {
        viewport: Viewport::initial(),
        max_iterations: DEFAULT_MAX_ITERATIONS,
    }));
    let keys = Arc::new(KeyStates::new());

    let instance = wgpu::Instance::new(wgpu::Backends::all());
    let surface = unsafe { instance.create_surface(&window) };

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: Default::default(),
        force_fallback_adapter: false,
        compatible_surface: Some(&surface),
    }))
    .unwrap();
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("device"),
            features: wgpu::Features::empty(),
            limits: wgpu::Limits::default(),
        },
        None,
    ))
    .unwrap();

    let mut surface_configuration = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface.get_supported_formats(&adapter)[0],
        width: size.width,
        height: size.height,
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
    };
    surface.configure(&device, &surface_configuration);

    let render_shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("render-shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
    });

    // The raster is uploaded into this texture every presenter tick. Its
    // size never changes; resizing the window only rescales presentation.
    let result_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("result-texture"),
        size: wgpu::Extent3d {
            width: frame_width as u32,
            height: frame_height as u32,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    });
    let result_texture_view = result_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let screen_size_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("screen-size-buffer"),
        contents: bytemuck::cast_slice(&[ScreenSize {
            surface: [size.width as f32, size.height as f32],
            frame: [frame_width as f32, frame_height as f32],
        }]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });

    let render_bind_group_layout =
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("render-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("render-pipeline-layout"),
        bind_group_layouts: &[&render_bind_group_layout],
        push_constant_ranges: &[],
    });

    let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("render-pipeline"),
        layout: Some(&render_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &render_shader_module,
            entry_point: "vertex_main",
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &render_shader_module,
            entry_point: "fragment_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_configuration.format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
    });

    let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("render-bind-group"),
        layout: &render_bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&result_texture_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &screen_size_buffer,
                    offset: 0,
                    size: None,
                }),
            },
        ],
    });

    let mut controller_thread = Some({
        let engine = Engine::new(Arc::clone(&frame), plan, Arc::clone(&shared));
        thread::spawn(move || engine.run())
    });
    info!("controller thread started");

    let mut update_thread = Some({
        let keys = Arc::clone(&keys);
        let shared = Arc::clone(&shared);
        thread::spawn(move || input::run_update_loop(&keys, &shared))
    });
    info!("update thread started");

    let mut raster = vec![0u8; frame.len()];
    let mut staging = vec![0u8; frame_width * frame_height * 4];
    let mut last_present = Instant::now() - PRESENT_DELAY;
    let mut last_status = DEFAULT_MAX_ITERATIONS;

    event_loop.run(move |event, _, control_flow| {
        match event {
            Event::MainEventsCleared => {
                if shared.quitting() {
                    for handle in [controller_thread.take(), update_thread.take()]
                        .into_iter()
                        .flatten()
                    {
                        if handle.join().is_err() {
                            error!("background thread panicked during shutdown");
                        }
                    }
                    *control_flow = ControlFlow::Exit;
                } else {
                    window.request_redraw();
                }
            }
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => {
                    shared.request_quit();
                }
                WindowEvent::KeyboardInput { input, .. } => match input.virtual_keycode {
                    Some(VirtualKeyCode::Escape) => shared.request_quit(),
                    Some(keycode) => {
                        if let Some(key) = map_key(keycode) {
                            keys.set(key, input.state == ElementState::Pressed);
                        }
                    }
                    None => {}
                },
                WindowEvent::Resized(new_size) => {
                    debug!("resizing to {:?}", new_size);

                    if new_size.width > 0 && new_size.height > 0 {
                        surface_configuration.width = new_size.width;
                        surface_configuration.height = new_size.height;
                        surface.configure(&device, &surface_configuration);

                        queue.write_buffer(
                            &screen_size_buffer,
                            0,
                            bytemuck::cast_slice(&[ScreenSize {
                                surface: [new_size.width as f32, new_size.height as f32],
                                frame: [frame_width as f32, frame_height as f32],
                            }]),
                        );

                        window.request_redraw();
                    }
                }
                _ => {}
            },
            Event::RedrawRequested(window_id) if window_id == window.id() => {
                if last_present.elapsed() >= PRESENT_DELAY {
                    last_present = Instant::now();

                    // Unsynchronized with the workers; a torn frame is fixed
                    // by the next presenter tick.
                    frame.snapshot_into(&mut raster);
                    for (rgba, rgb) in staging.chunks_exact_mut(4).zip(raster.chunks_exact(3)) {
                        rgba[..3].copy_from_slice(rgb);
                        rgba[3] = 0xff;
                    }
                    queue.write_texture(
                        wgpu::ImageCopyTexture {
                            texture: &result_texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        &staging,
                        wgpu::ImageDataLayout {
                            offset: 0,
                            bytes_per_row: NonZeroU32::new(frame_width as u32 * 4),
                            rows_per_image: None,
                        },
                        wgpu::Extent3d {
                            width: frame_width as u32,
                            height: frame_height as u32,
                            depth_or_array_layers: 1,
                        },
                    );

                    let max_iterations = shared.view.lock().unwrap().max_iterations;
                    if max_iterations != last_status {
                        last_status = max_iterations;
                        window.set_title(&format!("Max Iterations: {}", max_iterations));
                    }

                    let surface_texture = surface.get_current_texture().unwrap();
                    let surface_texture_view = surface_texture
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default());

                    let mut command_encoder =
                        device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
                    {
                        let mut render_pass =
                            command_encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                                label: Some("render-pass"),
                                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                                    view: &surface_texture_view,
                                    resolve_target: None,
                                    ops: wgpu::Operations {
                                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                                        store: true,
                                    },
                                })],
                                depth_stencil_attachment: None,
                            });

                        render_pass.set_pipeline(&render_pipeline);
                        render_pass.set_bind_group(0, &render_bind_group, &[]);
                        render_pass.draw(0..4, 0..1);
                    }

                    queue.submit([command_encoder.finish()]);
                    surface_texture.present();
                }
            }
            _ => {}
        }
    });
}
