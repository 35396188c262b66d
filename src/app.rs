//! Application state holding the wgpu graphics context and the UI.
//!
//! Owns the surface, device, and queue, the capture manager, the overlay
//! state, and the egui integration. The camera and the overlay image are
//! each drawn as one textured quad whose placement is computed per frame
//! from the central panel rect, so layer transforms live in a coordinate
//! space independent of whether the control panels are visible.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use crossbeam_channel::{Receiver, Sender};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseScrollDelta, TouchPhase, WindowEvent};
use winit::window::Window;

use crate::camera::{CaptureError, CaptureEvent, CaptureManager};
use crate::gesture::{GestureController, Point};
use crate::overlay::{
    self, GestureTarget, ImageEvent, OverlayState, StateEvent, Transform, MIN_OPACITY,
};
use crate::prefs::{self, PrefStore};

/// Per-layer quad placement and opacity, in clip space.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LayerParams {
    center: [f32; 2],
    half_size: [f32; 2],
    opacity: f32,
    _pad: [f32; 3],
}

/// GPU resources for one textured layer.
struct LayerTexture {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// Main application state.
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Layer rendering
    layer_pipeline: wgpu::RenderPipeline,
    layer_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    camera_params_buffer: wgpu::Buffer,
    overlay_params_buffer: wgpu::Buffer,
    camera_layer: Option<LayerTexture>,
    overlay_layer: Option<LayerTexture>,
    last_camera_frame: u64,

    // Camera capture
    camera: Option<CaptureManager>,
    camera_events: (Sender<CaptureEvent>, Receiver<CaptureEvent>),
    camera_generation: u64,
    camera_acquiring: bool,
    camera_name: Option<String>,
    camera_error: Option<CaptureError>,

    // Overlay image loading
    image_events: (Sender<ImageEvent>, Receiver<ImageEvent>),
    image_generation: u64,

    // State and input
    state: OverlayState,
    prefs: PrefStore,
    gesture: GestureController,
    touches: BTreeMap<u64, Point>,
    /// Last cursor position in logical points; None until the first move.
    pointer_pos: Option<Point>,
    pointer_down: bool,

    // Viewport rect from the previous frame's layout, logical points.
    viewport_rect: egui::Rect,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App instance with an initialized wgpu context.
    pub async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Camera Overlay Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        // Layer pipeline: one textured quad per layer, alpha-blended.
        let layer_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Layer Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/layer.wgsl").into()),
        });

        let layer_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Layer Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let layer_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Layer Pipeline Layout"),
                bind_group_layouts: &[&layer_bind_group_layout],
                push_constant_ranges: &[],
            });

        let layer_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Layer Pipeline"),
            layout: Some(&layer_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &layer_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &layer_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::SrcAlpha,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                            operation: wgpu::BlendOperation::Add,
                        },
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Layer Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let params_size = std::mem::size_of::<LayerParams>() as u64;
        let camera_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Params Buffer"),
            size: params_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let overlay_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Overlay Params Buffer"),
            size: params_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let prefs = PrefStore::open_default();
        let state = OverlayState::restore(&prefs);

        let now = Instant::now();
        let scale = window.scale_factor() as f32;
        let viewport_rect = egui::Rect::from_min_size(
            egui::Pos2::ZERO,
            egui::vec2(size.width as f32 / scale, size.height as f32 / scale),
        );

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            layer_pipeline,
            layer_bind_group_layout,
            sampler,
            camera_params_buffer,
            overlay_params_buffer,
            camera_layer: None,
            overlay_layer: None,
            last_camera_frame: 0,
            camera: None,
            camera_events: crossbeam_channel::unbounded(),
            camera_generation: 0,
            camera_acquiring: false,
            camera_name: None,
            camera_error: None,
            image_events: crossbeam_channel::unbounded(),
            image_generation: 0,
            state,
            prefs,
            gesture: GestureController::new(),
            touches: BTreeMap::new(),
            pointer_pos: None,
            pointer_down: false,
            viewport_rect,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 60.0,
            last_fps_update: now,
            frames_since_update: 0,
        };

        if app.state.consented {
            app.begin_acquire();
        }

        app
    }

    /// Handle a window event, returning true if egui consumed it.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    // ---- camera ----

    /// Start (or restart) camera acquisition under a fresh generation.
    fn begin_acquire(&mut self) {
        self.release_camera();
        self.camera_generation += 1;
        self.camera_error = None;
        self.camera_acquiring = true;
        self.camera = Some(CaptureManager::acquire(
            self.camera_generation,
            self.camera_events.0.clone(),
        ));
    }

    /// Stop the capture thread and drop the stream. Any acquisition result
    /// still in flight is orphaned by the generation bump in begin_acquire.
    pub fn release_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
        self.camera_layer = None;
        self.camera_name = None;
        self.camera_acquiring = false;
        self.last_camera_frame = 0;
    }

    pub fn retry_capture(&mut self) {
        if self.state.consented {
            self.begin_acquire();
        }
    }

    pub fn toggle_chrome(&mut self) {
        self.state.apply(StateEvent::ToggleChrome);
    }

    /// Drain acquisition and decode results, dropping anything whose
    /// generation is no longer current.
    pub fn poll_events(&mut self) {
        while let Ok(event) = self.camera_events.1.try_recv() {
            match event {
                CaptureEvent::Ready {
                    generation,
                    tier,
                    name,
                    width,
                    height,
                } => {
                    if generation != self.camera_generation {
                        log::info!("Dropping stale camera result (generation {})", generation);
                        continue;
                    }
                    log::info!(
                        "Camera ready: {} ({}x{}) via {}",
                        name,
                        width,
                        height,
                        tier.label()
                    );
                    self.camera_acquiring = false;
                    self.camera_name = Some(name);
                }
                CaptureEvent::Failed { generation, error } => {
                    if generation != self.camera_generation {
                        continue;
                    }
                    log::error!("Camera acquisition failed: {}", error);
                    self.release_camera();
                    self.camera_error = Some(error);
                }
            }
        }

        while let Ok(event) = self.image_events.1.try_recv() {
            match event {
                ImageEvent::Loaded { generation, image } => {
                    if generation != self.image_generation {
                        log::info!("Dropping stale image decode (generation {})", generation);
                        continue;
                    }
                    self.overlay_layer = Some(self.upload_layer(
                        "Overlay Texture",
                        &self.overlay_params_buffer,
                        &image.data,
                        image.width,
                        image.height,
                    ));
                    self.state
                        .apply(StateEvent::ImageLoaded(image.width, image.height));
                    self.state.image = Some(image);
                }
                ImageEvent::Failed { generation, reason } => {
                    if generation == self.image_generation {
                        log::warn!("Overlay image load failed: {}", reason);
                    }
                }
            }
        }
    }

    /// Poll for a new camera frame and upload it, (re)creating the texture
    /// whenever it is missing or the frame size changed. This is also what
    /// re-binds the feed after the surface is recreated, without touching
    /// the hardware again.
    pub fn update_camera(&mut self) {
        let Some(camera) = &self.camera else { return };
        let Some(frame) = camera.latest_frame() else {
            return;
        };
        if frame.frame_number <= self.last_camera_frame && self.camera_layer.is_some() {
            return;
        }
        self.last_camera_frame = frame.frame_number;

        let needs_new_texture = match &self.camera_layer {
            None => true,
            Some(layer) => layer.width != frame.width || layer.height != frame.height,
        };
        if needs_new_texture {
            log::info!("Creating camera texture: {}x{}", frame.width, frame.height);
            self.camera_layer = Some(self.upload_layer(
                "Camera Texture",
                &self.camera_params_buffer,
                &frame.data,
                frame.width,
                frame.height,
            ));
        } else if let Some(layer) = &self.camera_layer {
            self.write_layer(layer, &frame.data, frame.width, frame.height);
        }
    }

    fn upload_layer(
        &self,
        label: &str,
        params_buffer: &wgpu::Buffer,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> LayerTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layer_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let layer = LayerTexture {
            _texture: texture,
            bind_group,
            width,
            height,
        };
        self.write_layer(&layer, data, width, height);
        layer
    }

    fn write_layer(&self, layer: &LayerTexture, data: &[u8], width: u32, height: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &layer._texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    // ---- overlay image ----

    /// Pick and decode a new overlay image. The decode runs on a background
    /// thread; a later pick supersedes an undecoded earlier one.
    pub fn pick_image(&mut self) {
        let picked = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "gif", "webp", "bmp"])
            .pick_file();
        if let Some(path) = picked {
            self.image_generation += 1;
            overlay::load_image(path, self.image_generation, self.image_events.0.clone());
        }
    }

    fn clear_image(&mut self) {
        self.image_generation += 1;
        self.overlay_layer = None;
        self.state.clear_image(&mut self.prefs);
    }

    // ---- pointer and touch input ----

    fn scale_factor(&self) -> f32 {
        self.window.scale_factor() as f32
    }

    pub fn on_pointer_move(&mut self, x: f32, y: f32) {
        let scale = self.scale_factor();
        let point = (x / scale, y / scale);
        self.pointer_pos = Some(point);
        if self.pointer_down && !self.touches.is_empty() {
            return;
        }
        if self.pointer_down {
            if let Some(transform) = self.state.active_transform_mut() {
                self.gesture.update(&[point], transform);
            }
        }
    }

    /// Left mouse button press/release. Ignored while no target is active,
    /// so clicks fall through to the UI.
    pub fn on_mouse_button(&mut self, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.state.target == GestureTarget::None {
                    return;
                }
                self.pointer_down = true;
                // A press can arrive before any cursor move; leave the
                // controller idle then and let the first move record the
                // drag origin, so no delta is measured from the window
                // origin.
                if let Some(pos) = self.pointer_pos {
                    self.gesture.begin(&[pos]);
                }
            }
            ElementState::Released => {
                if !self.pointer_down {
                    return;
                }
                self.pointer_down = false;
                if self.gesture.finish(&[]) {
                    self.state.persist_active_transform(&mut self.prefs);
                }
            }
        }
    }

    /// Scroll-wheel zoom on the active target. The wheel has no end event,
    /// so the transform persists immediately.
    pub fn on_scroll(&mut self, delta: MouseScrollDelta) {
        if self.state.target == GestureTarget::None {
            return;
        }
        let notches = match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
        };
        if notches == 0.0 {
            return;
        }
        if let Some(transform) = self.state.active_transform_mut() {
            transform.zoom_by(1.0 + notches * 0.1);
        }
        self.state.persist_active_transform(&mut self.prefs);
    }

    /// Touch tracking: the full current contact set is fed to the gesture
    /// controller on every change, which is what makes pinch-to-drag
    /// transitions seamless.
    pub fn on_touch(&mut self, touch: winit::event::Touch) {
        if self.state.target == GestureTarget::None {
            return;
        }
        let scale = self.scale_factor();
        let point = (
            touch.location.x as f32 / scale,
            touch.location.y as f32 / scale,
        );

        match touch.phase {
            TouchPhase::Started => {
                self.touches.insert(touch.id, point);
                let points = self.touch_points();
                self.gesture.begin(&points);
            }
            TouchPhase::Moved => {
                self.touches.insert(touch.id, point);
                let points = self.touch_points();
                if let Some(transform) = self.state.active_transform_mut() {
                    self.gesture.update(&points, transform);
                }
            }
            TouchPhase::Ended | TouchPhase::Cancelled => {
                self.touches.remove(&touch.id);
                let points = self.touch_points();
                if self.gesture.finish(&points) {
                    self.state.persist_active_transform(&mut self.prefs);
                }
            }
        }
    }

    fn touch_points(&self) -> Vec<Point> {
        self.touches.values().copied().collect()
    }

    // ---- rendering ----

    /// Fold the viewport rect, aspect fit, and a layer transform into quad
    /// placement in clip space.
    fn layer_params(&self, width: u32, height: u32, t: &Transform, opacity: f32) -> LayerParams {
        let scale = self.scale_factor();
        let rect = self.viewport_rect;

        let fit = (rect.width() / width as f32)
            .min(rect.height() / height as f32)
            .max(0.0);
        let quad_w = width as f32 * fit * t.scale;
        let quad_h = height as f32 * fit * t.scale;
        let center_x = rect.center().x + t.x;
        let center_y = rect.center().y + t.y;

        // Logical points to physical pixels to NDC.
        let surface_w = self.size.width.max(1) as f32;
        let surface_h = self.size.height.max(1) as f32;
        LayerParams {
            center: [
                (center_x * scale / surface_w) * 2.0 - 1.0,
                1.0 - (center_y * scale / surface_h) * 2.0,
            ],
            half_size: [quad_w * scale / surface_w, quad_h * scale / surface_h],
            opacity,
            _pad: [0.0; 3],
        }
    }

    /// Render a frame: camera quad, overlay quad, then the egui pass.
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        let show_layers = self.state.consented && self.camera_error.is_none();

        if show_layers {
            if let Some(layer) = &self.camera_layer {
                let params = self.layer_params(
                    layer.width,
                    layer.height,
                    &self.state.viewport_transform,
                    1.0,
                );
                self.queue
                    .write_buffer(&self.camera_params_buffer, 0, bytemuck::bytes_of(&params));
            }
            if let (Some(layer), Some(_)) = (&self.overlay_layer, &self.state.image) {
                let params = self.layer_params(
                    layer.width,
                    layer.height,
                    &self.state.overlay_transform,
                    self.state.opacity,
                );
                self.queue
                    .write_buffer(&self.overlay_params_buffer, 0, bytemuck::bytes_of(&params));
            }
        }

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Layer Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if show_layers {
                render_pass.set_pipeline(&self.layer_pipeline);
                if let Some(layer) = &self.camera_layer {
                    render_pass.set_bind_group(0, &layer.bind_group, &[]);
                    render_pass.draw(0..6, 0..1);
                }
                if self.state.image.is_some() {
                    if let Some(layer) = &self.overlay_layer {
                        render_pass.set_bind_group(0, &layer.bind_group, &[]);
                        render_pass.draw(0..6, 0..1);
                    }
                }
            }
        }

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();
        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot state before the closure so it doesn't borrow self.
        let consented = self.state.consented;
        let chrome_hidden = self.state.chrome_hidden;
        let target = self.state.target;
        let has_image = self.state.image.is_some();
        let fps = self.fps;
        let camera_name = self.camera_name.clone();
        let camera_acquiring = self.camera_acquiring;
        let camera_error = self.camera_error.clone();
        let camera_frames = self.camera.as_ref().map(|c| c.frame_count()).unwrap_or(0);
        let mut opacity = self.state.opacity;

        // Buffered UI actions, applied after the closure returns.
        let mut grant_consent = false;
        let mut pick_image = false;
        let mut clear_image = false;
        let mut select_target: Option<GestureTarget> = None;
        let mut retry_capture = false;
        let mut toggle_chrome = false;
        let mut viewport_rect = self.viewport_rect;

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            if !consented {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.vertical_centered(|ui| {
                        ui.add_space(60.0);
                        ui.heading("Camera Overlay");
                        ui.add_space(12.0);
                        ui.label(
                            "This tool shows your camera feed with a reference \
                             image overlaid on top for tracing and alignment.",
                        );
                        ui.label(
                            "The feed never leaves this device. Nothing is stored \
                             except small preferences (opacity and layer positions) \
                             in your local config directory.",
                        );
                        ui.add_space(12.0);
                        if ui.button("Start camera").clicked() {
                            grant_consent = true;
                        }
                    });
                });
                return;
            }

            if let Some(error) = &camera_error {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.vertical_centered(|ui| {
                        ui.add_space(60.0);
                        ui.heading("Camera error");
                        ui.add_space(8.0);
                        ui.label(error.to_string());
                        ui.add_space(8.0);
                        ui.label(error.remediation());
                        ui.add_space(12.0);
                        if error.is_retryable() && ui.button("Retry").clicked() {
                            retry_capture = true;
                        }
                    });
                });
                return;
            }

            if !chrome_hidden {
                egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
                    ui.horizontal(|ui| {
                        ui.label("Camera Overlay");
                        ui.separator();
                        ui.label(format!("FPS: {:.1}", fps));
                        ui.separator();
                        match &camera_name {
                            Some(name) => {
                                ui.label(format!("{} ({} frames)", name, camera_frames));
                            }
                            None if camera_acquiring => {
                                ui.label("Connecting to camera...");
                            }
                            None => {
                                ui.label("No camera");
                            }
                        }
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.button("Hide controls (H)").clicked() {
                                toggle_chrome = true;
                            }
                        });
                    });
                });

                egui::SidePanel::left("controls").show(ctx, |ui| {
                    ui.heading("Overlay");
                    ui.separator();

                    if ui.button("Load image...").clicked() {
                        pick_image = true;
                    }
                    if has_image && ui.button("Clear image").clicked() {
                        clear_image = true;
                    }

                    ui.add_space(4.0);
                    ui.add(
                        egui::Slider::new(&mut opacity, MIN_OPACITY..=1.0)
                            .step_by(0.01)
                            .text("Opacity"),
                    );

                    ui.separator();
                    ui.heading("Move & scale");
                    ui.label("Drag to move, pinch or scroll to zoom.");

                    if ui
                        .selectable_label(target == GestureTarget::Overlay, "Overlay image")
                        .clicked()
                    {
                        select_target = Some(GestureTarget::Overlay);
                    }
                    if ui
                        .selectable_label(target == GestureTarget::Viewport, "Camera view")
                        .clicked()
                    {
                        select_target = Some(GestureTarget::Viewport);
                    }
                    if target == GestureTarget::None {
                        ui.label("No layer selected; input passes through.");
                    }

                    ui.separator();
                    if ui.button("Retry camera (R)").clicked() {
                        retry_capture = true;
                    }
                });
            }

            // The central panel is the camera viewport; its rect drives
            // quad placement next frame.
            egui::CentralPanel::default()
                .frame(egui::Frame::NONE)
                .show(ctx, |ui| {
                    viewport_rect = ui.max_rect();
                });
        });

        // Apply buffered actions.
        self.viewport_rect = viewport_rect;
        if grant_consent {
            self.state.apply(StateEvent::ConsentGranted);
            self.prefs.save(prefs::KEY_CONSENT, &true);
            self.begin_acquire();
        }
        if toggle_chrome {
            self.toggle_chrome();
        }
        if retry_capture {
            self.retry_capture();
        }
        if pick_image {
            self.pick_image();
        }
        if clear_image {
            self.clear_image();
        }
        if let Some(target) = select_target {
            self.state.apply(StateEvent::SelectTarget(target));
        }
        if opacity != self.state.opacity {
            self.state.apply(StateEvent::SetOpacity(opacity));
            self.prefs.save(prefs::KEY_OPACITY, &self.state.opacity);
        }

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}
