//! winit input and window state for Dear ImGui.

use imgui::{Io, Key};
use winit::dpi::PhysicalPosition;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

/// Feeds window events into an ImGui context.
#[derive(Debug, Clone, Copy)]
pub struct ImguiPlatform {
    scale_factor: f64,
}

impl ImguiPlatform {
    pub fn new(window: &Window) -> Self {
        Self {
            scale_factor: window.scale_factor(),
        }
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Forward an event to ImGui.
    ///
    /// Returns `true` if ImGui wants to consume this kind of input.
    pub fn handle_event(&mut self, io: &mut Io, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = *scale_factor;
                false
            }
            WindowEvent::CursorMoved { position, .. } => {
                io.add_mouse_pos_event(to_logical(*position, self.scale_factor));
                io.want_capture_mouse
            }
            WindowEvent::CursorLeft { .. } => {
                io.add_mouse_pos_event([-f32::MAX, -f32::MAX]);
                false
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = map_mouse_button(*button) {
                    io.add_mouse_button_event(button, *state == ElementState::Pressed);
                }
                io.want_capture_mouse
            }
            WindowEvent::MouseWheel { delta, .. } => {
                io.add_mouse_wheel_event(wheel_delta(*delta));
                io.want_capture_mouse
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                let state = modifiers.state();
                io.add_key_event(Key::ModCtrl, state.control_key());
                io.add_key_event(Key::ModShift, state.shift_key());
                io.add_key_event(Key::ModAlt, state.alt_key());
                io.add_key_event(Key::ModSuper, state.super_key());
                false
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state.is_pressed();
                if let PhysicalKey::Code(code) = event.physical_key {
                    if let Some(key) = map_key(code) {
                        io.add_key_event(key, pressed);
                    }
                }
                if pressed {
                    if let Some(text) = &event.text {
                        for ch in text.chars().filter(|ch| !ch.is_control()) {
                            io.add_input_character(ch);
                        }
                    }
                }
                io.want_capture_keyboard
            }
            WindowEvent::Focused(focused) => {
                // Releases keys held while alt-tabbing away
                if !focused {
                    io.app_focus_lost = true;
                }
                false
            }
            _ => false,
        }
    }

    /// Update display metrics and delta time before `new_frame`.
    pub fn prepare_frame(&mut self, io: &mut Io, window: &Window, dt: f32) {
        self.scale_factor = window.scale_factor();
        let logical = window.inner_size().to_logical::<f32>(self.scale_factor);
        io.display_size = [logical.width, logical.height];
        let scale = self.scale_factor as f32;
        io.display_framebuffer_scale = [scale, scale];
        // ImGui asserts on a zero delta
        io.delta_time = dt.max(1.0e-6);
    }
}

fn to_logical(position: PhysicalPosition<f64>, scale_factor: f64) -> [f32; 2] {
    let logical = position.to_logical::<f64>(scale_factor);
    [logical.x as f32, logical.y as f32]
}

fn map_mouse_button(button: MouseButton) -> Option<imgui::MouseButton> {
    match button {
        MouseButton::Left => Some(imgui::MouseButton::Left),
        MouseButton::Right => Some(imgui::MouseButton::Right),
        MouseButton::Middle => Some(imgui::MouseButton::Middle),
        MouseButton::Back => Some(imgui::MouseButton::Extra1),
        MouseButton::Forward => Some(imgui::MouseButton::Extra2),
        MouseButton::Other(_) => None,
    }
}

/// Wheel movement in lines; pixel deltas only carry a direction.
fn wheel_delta(delta: MouseScrollDelta) -> [f32; 2] {
    match delta {
        MouseScrollDelta::LineDelta(h, v) => [h, v],
        MouseScrollDelta::PixelDelta(pos) => [step(pos.x), step(pos.y)],
    }
}

fn step(value: f64) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Translate a physical key code into an ImGui key.
pub fn map_key(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::Tab => Key::Tab,
        KeyCode::ArrowLeft => Key::LeftArrow,
        KeyCode::ArrowRight => Key::RightArrow,
        KeyCode::ArrowUp => Key::UpArrow,
        KeyCode::ArrowDown => Key::DownArrow,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::Insert => Key::Insert,
        KeyCode::Delete => Key::Delete,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Space => Key::Space,
        KeyCode::Enter => Key::Enter,
        KeyCode::Escape => Key::Escape,
        KeyCode::ControlLeft => Key::LeftCtrl,
        KeyCode::ShiftLeft => Key::LeftShift,
        KeyCode::AltLeft => Key::LeftAlt,
        KeyCode::SuperLeft => Key::LeftSuper,
        KeyCode::ControlRight => Key::RightCtrl,
        KeyCode::ShiftRight => Key::RightShift,
        KeyCode::AltRight => Key::RightAlt,
        KeyCode::SuperRight => Key::RightSuper,
        KeyCode::Digit0 => Key::Alpha0,
        KeyCode::Digit1 => Key::Alpha1,
        KeyCode::Digit2 => Key::Alpha2,
        KeyCode::Digit3 => Key::Alpha3,
        KeyCode::Digit4 => Key::Alpha4,
        KeyCode::Digit5 => Key::Alpha5,
        KeyCode::Digit6 => Key::Alpha6,
        KeyCode::Digit7 => Key::Alpha7,
        KeyCode::Digit8 => Key::Alpha8,
        KeyCode::Digit9 => Key::Alpha9,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyB => Key::B,
        KeyCode::KeyC => Key::C,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyE => Key::E,
        KeyCode::KeyF => Key::F,
        KeyCode::KeyG => Key::G,
        KeyCode::KeyH => Key::H,
        KeyCode::KeyI => Key::I,
        KeyCode::KeyJ => Key::J,
        KeyCode::KeyK => Key::K,
        KeyCode::KeyL => Key::L,
        KeyCode::KeyM => Key::M,
        KeyCode::KeyN => Key::N,
        KeyCode::KeyO => Key::O,
        KeyCode::KeyP => Key::P,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyR => Key::R,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyT => Key::T,
        KeyCode::KeyU => Key::U,
        KeyCode::KeyV => Key::V,
        KeyCode::KeyW => Key::W,
        KeyCode::KeyX => Key::X,
        KeyCode::KeyY => Key::Y,
        KeyCode::KeyZ => Key::Z,
        KeyCode::F1 => Key::F1,
        KeyCode::F2 => Key::F2,
        KeyCode::F3 => Key::F3,
        KeyCode::F4 => Key::F4,
        KeyCode::F5 => Key::F5,
        KeyCode::F6 => Key::F6,
        KeyCode::F7 => Key::F7,
        KeyCode::F8 => Key::F8,
        KeyCode::F9 => Key::F9,
        KeyCode::F10 => Key::F10,
        KeyCode::F11 => Key::F11,
        KeyCode::F12 => Key::F12,
        KeyCode::Minus => Key::Minus,
        KeyCode::Equal => Key::Equal,
        KeyCode::Comma => Key::Comma,
        KeyCode::Period => Key::Period,
        KeyCode::Slash => Key::Slash,
        KeyCode::Semicolon => Key::Semicolon,
        KeyCode::Quote => Key::Apostrophe,
        KeyCode::BracketLeft => Key::LeftBracket,
        KeyCode::BracketRight => Key::RightBracket,
        KeyCode::Backslash => Key::Backslash,
        KeyCode::Backquote => Key::GraveAccent,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_editing_keys() {
        assert_eq!(map_key(KeyCode::Backspace), Some(Key::Backspace));
        assert_eq!(map_key(KeyCode::ArrowLeft), Some(Key::LeftArrow));
        assert_eq!(map_key(KeyCode::KeyA), Some(Key::A));
        assert_eq!(map_key(KeyCode::Digit7), Some(Key::Alpha7));
        assert_eq!(map_key(KeyCode::F12), Some(Key::F12));
        assert_eq!(map_key(KeyCode::MediaPlayPause), None);
    }

    #[test]
    fn maps_mouse_buttons() {
        assert_eq!(
            map_mouse_button(MouseButton::Left),
            Some(imgui::MouseButton::Left)
        );
        assert_eq!(
            map_mouse_button(MouseButton::Back),
            Some(imgui::MouseButton::Extra1)
        );
        assert_eq!(map_mouse_button(MouseButton::Other(9)), None);
    }

    #[test]
    fn wheel_deltas() {
        assert_eq!(wheel_delta(MouseScrollDelta::LineDelta(0.0, 2.0)), [0.0, 2.0]);
        let pixels = MouseScrollDelta::PixelDelta(PhysicalPosition::new(-30.0, 12.5));
        assert_eq!(wheel_delta(pixels), [-1.0, 1.0]);
        let still = MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 0.0));
        assert_eq!(wheel_delta(still), [0.0, 0.0]);
    }

    #[test]
    fn cursor_positions_are_logical() {
        assert_eq!(to_logical(PhysicalPosition::new(200.0, 100.0), 2.0), [100.0, 50.0]);
        assert_eq!(to_logical(PhysicalPosition::new(15.0, 30.0), 1.0), [15.0, 30.0]);
    }
}
