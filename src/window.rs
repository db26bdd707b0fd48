//! Window management using winit
//!
//! Wraps the winit window and event loop and collects per-frame input
//! for the free-fly camera: held movement keys, look deltas while the
//! right mouse button is down and scroll wheel zoom.

use crate::scene::MoveDirection;
use std::collections::HashSet;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Keyboard and mouse state accumulated between frames
#[derive(Default)]
struct InputState {
    held: HashSet<KeyCode>,
    /// Keys that went down since the last frame
    tapped: HashSet<KeyCode>,
    looking: bool,
    cursor: Option<(f64, f64)>,
    look_delta: (f32, f32),
    scroll_delta: f32,
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    input: InputState,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Self {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)
                .expect("Failed to create window"),
        );

        Self {
            window,
            width,
            height,
            resized: false,
            close_requested: false,
            input: InputState::default(),
        }
    }

    /// Get arc reference to window for backend initialization
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Get current window dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since last frame
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Clear the resize flag
    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    /// Check if close was requested
    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Currently held movement keys mapped onto the camera basis
    pub fn move_directions(&self) -> Vec<MoveDirection> {
        let mut directions = Vec::new();
        let map = [
            (KeyCode::KeyW, MoveDirection::Forward),
            (KeyCode::KeyS, MoveDirection::Backward),
            (KeyCode::KeyA, MoveDirection::Left),
            (KeyCode::KeyD, MoveDirection::Right),
            (KeyCode::KeyE, MoveDirection::Up),
            (KeyCode::KeyQ, MoveDirection::Down),
        ];
        for (key, direction) in map {
            if self.input.held.contains(&key) {
                directions.push(direction);
            }
        }
        directions
    }

    /// Whether a speed modifier key is held
    pub fn boost(&self) -> bool {
        self.input.held.contains(&KeyCode::ShiftLeft)
    }

    /// Whether the key went down since the last frame
    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.input.tapped.contains(&key)
    }

    /// Cursor movement while the look button was held, then reset
    pub fn take_look_delta(&mut self) -> (f32, f32) {
        std::mem::take(&mut self.input.look_delta)
    }

    /// Scroll wheel movement since the last frame, then reset
    pub fn take_scroll_delta(&mut self) -> f32 {
        std::mem::take(&mut self.input.scroll_delta)
    }

    /// Clear per-frame input accumulators, called once per callback
    pub fn end_frame(&mut self) {
        self.input.tapped.clear();
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            if !event.repeat && self.input.held.insert(code) {
                                self.input.tapped.insert(code);
                            }
                        }
                        ElementState::Released => {
                            self.input.held.remove(&code);
                        }
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if *button == MouseButton::Right {
                    self.input.looking = *state == ElementState::Pressed;
                    if !self.input.looking {
                        self.input.cursor = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.input.looking {
                    if let Some((last_x, last_y)) = self.input.cursor {
                        self.input.look_delta.0 += (position.x - last_x) as f32;
                        self.input.look_delta.1 += (position.y - last_y) as f32;
                    }
                    self.input.cursor = Some((position.x, position.y));
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.input.scroll_delta += match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
                };
            }
            _ => {}
        }
    }

    /// Request a redraw
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Run the application with a callback
pub fn run<F>(title: &str, width: u32, height: u32, mut callback: F)
where
    F: FnMut(&mut Window) + 'static,
{
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut window = Window::new(&event_loop, title, width, height);

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);

                    if let WindowEvent::CloseRequested = event {
                        elwt.exit();
                    }
                }
                Event::AboutToWait => {
                    callback(&mut window);
                    window.end_frame();
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .expect("Event loop failed");
}
