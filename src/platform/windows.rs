use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};
use winapi::ctypes::c_int;
use winapi::shared::minwindef::{DWORD, LPARAM, LRESULT, UINT, WPARAM};
use winapi::um::libloaderapi::GetModuleHandleW;
use winapi::um::processthreadsapi::GetCurrentThreadId;
use winapi::um::winuser::{
    CallNextHookEx, DispatchMessageW, GetAsyncKeyState, GetForegroundWindow, GetKeyState,
    GetKeyboardLayout, GetMessageW, GetWindowThreadProcessId, PeekMessageW, PostThreadMessageW,
    SendInput, SetWindowsHookExW, ToUnicodeEx, TranslateMessage, UnhookWindowsHookEx, HC_ACTION,
    INPUT, INPUT_KEYBOARD, KBDLLHOOKSTRUCT, KEYBDINPUT, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MSG,
    PM_NOREMOVE, VK_BACK, VK_CAPITAL, VK_CONTROL, VK_LCONTROL, VK_LMENU, VK_LSHIFT, VK_MENU,
    VK_PACKET, VK_RCONTROL, VK_RETURN, VK_RMENU, VK_RSHIFT, VK_SHIFT, WH_KEYBOARD_LL, WM_KEYDOWN,
    WM_QUIT, WM_SYSKEYDOWN, WM_USER,
};

use crate::errors::KeyboardError;
use crate::key_event::{is_special_key, KeyEvent};
use crate::keyboard_api::{KeySubscriber, KeystrokeSource, SyntheticInputSink, SyntheticKey};
use crate::Result;

/// `ToUnicodeEx` flag: leave the kernel keyboard state (dead keys) untouched.
const TO_UNICODE_NO_STATE_CHANGE: UINT = 0x4;

const MODIFIER_KEYS: [c_int; 9] = [
    VK_SHIFT, VK_LSHIFT, VK_RSHIFT, VK_CONTROL, VK_LCONTROL, VK_RCONTROL, VK_MENU, VK_LMENU,
    VK_RMENU,
];

// The hook procedure is a bare function pointer, so the subscriber lives in
// a process-wide slot. Occupied means a source is installed.
static SUBSCRIBER: Lazy<Mutex<Option<KeySubscriber>>> = Lazy::new(|| Mutex::new(None));

struct HookThread {
    thread_id: DWORD,
    handle: JoinHandle<()>,
}

/// `WH_KEYBOARD_LL` hook running on its own message-loop thread.
#[derive(Default)]
pub struct WindowsKeystrokeSource {
    hook: Option<HookThread>,
}

impl WindowsKeystrokeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeystrokeSource for WindowsKeystrokeSource {
    fn start(&mut self, subscriber: KeySubscriber) -> Result<()> {
        if self.hook.is_some() {
            return Ok(());
        }

        {
            let mut slot = SUBSCRIBER.lock();
            if slot.is_some() {
                return Err(KeyboardError::HookError(
                    "another keystroke source is already installed".into(),
                )
                .into());
            }
            *slot = Some(subscriber);
        }

        let (ready_tx, ready_rx) = bounded(0);
        let spawned = thread::Builder::new()
            .name("expandr-hook".into())
            .spawn(move || run_hook_thread(ready_tx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *SUBSCRIBER.lock() = None;
                return Err(e.into());
            }
        };

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(KeyboardError::HookError(
                "hook thread exited before reporting".into(),
            ))
        });
        match ready {
            Ok(thread_id) => {
                info!(thread_id, "Low-level keyboard hook installed");
                self.hook = Some(HookThread { thread_id, handle });
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                *SUBSCRIBER.lock() = None;
                error!("Failed to install keyboard hook: {}", e);
                Err(e.into())
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        let Some(hook) = self.hook.take() else {
            return Ok(());
        };

        let posted = unsafe { PostThreadMessageW(hook.thread_id, WM_QUIT, 0, 0) };
        if posted == 0 {
            let err = io::Error::last_os_error();
            self.hook = Some(hook);
            return Err(KeyboardError::SystemError(format!(
                "failed to signal hook thread: {}",
                err
            ))
            .into());
        }

        if hook.handle.join().is_err() {
            warn!("Hook thread panicked during shutdown");
        }
        *SUBSCRIBER.lock() = None;
        info!("Low-level keyboard hook removed");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.hook.is_some()
    }
}

impl Drop for WindowsKeystrokeSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to remove keyboard hook: {}", e);
        }
    }
}

fn run_hook_thread(ready: Sender<std::result::Result<DWORD, KeyboardError>>) {
    unsafe {
        let mut msg: MSG = mem::zeroed();
        // Creates the thread's message queue so WM_QUIT can be posted to it.
        PeekMessageW(&mut msg, ptr::null_mut(), WM_USER, WM_USER, PM_NOREMOVE);

        let hook = SetWindowsHookExW(
            WH_KEYBOARD_LL,
            Some(keyboard_hook_proc),
            GetModuleHandleW(ptr::null()),
            0,
        );
        if hook.is_null() {
            let err = io::Error::last_os_error();
            let _ = ready.send(Err(KeyboardError::HookError(format!(
                "SetWindowsHookExW failed: {}",
                err
            ))));
            return;
        }
        let _ = ready.send(Ok(GetCurrentThreadId()));

        loop {
            match GetMessageW(&mut msg, ptr::null_mut(), 0, 0) {
                -1 => {
                    error!("GetMessageW failed: {}", io::Error::last_os_error());
                    break;
                }
                0 => {
                    debug!("WM_QUIT received, leaving hook message loop");
                    break;
                }
                _ => {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
        }

        if UnhookWindowsHookEx(hook) == 0 {
            warn!("UnhookWindowsHookEx failed: {}", io::Error::last_os_error());
        }
    }
}

unsafe extern "system" fn keyboard_hook_proc(
    code: c_int,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if code == HC_ACTION && matches!(w_param as UINT, WM_KEYDOWN | WM_SYSKEYDOWN) {
        let info = &*(l_param as *const KBDLLHOOKSTRUCT);
        let subscriber = SUBSCRIBER.lock().clone();
        if let Some(subscriber) = subscriber {
            let event = KeyEvent::new(info.vkCode, resolve_character(info));
            trace!(vk = event.vk_code, "Key down");
            // Unwinding into the OS would abort the process.
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                error!("Key subscriber panicked");
            }
        }
    }

    CallNextHookEx(ptr::null_mut(), code, w_param, l_param)
}

/// Character the foreground window's layout produces for this key, given
/// the live modifier and Caps Lock state.
unsafe fn resolve_character(info: &KBDLLHOOKSTRUCT) -> Option<char> {
    // Injected KEYEVENTF_UNICODE input carries its UTF-16 unit in scanCode.
    if info.vkCode == VK_PACKET as u32 {
        return char::from_u32(info.scanCode);
    }
    if is_special_key(info.vkCode) {
        return None;
    }

    let mut key_state = [0u8; 256];
    for vk in MODIFIER_KEYS {
        if GetAsyncKeyState(vk) as u16 & 0x8000 != 0 {
            key_state[vk as usize] = 0x80;
        }
    }
    if GetKeyState(VK_CAPITAL) & 1 != 0 {
        key_state[VK_CAPITAL as usize] = 0x01;
    }

    let foreground_thread = GetWindowThreadProcessId(GetForegroundWindow(), ptr::null_mut());
    let layout = GetKeyboardLayout(foreground_thread);

    let mut units = [0u16; 8];
    let written = ToUnicodeEx(
        info.vkCode,
        info.scanCode,
        key_state.as_ptr(),
        units.as_mut_ptr(),
        units.len() as c_int,
        TO_UNICODE_NO_STATE_CHANGE,
        layout,
    );
    // Negative: dead key. Zero: no translation.
    if written <= 0 {
        return None;
    }
    char::decode_utf16(units[..written as usize].iter().copied())
        .next()?
        .ok()
}

/// Synthetic keystrokes through `SendInput`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsInputSink;

impl WindowsInputSink {
    pub fn new() -> Self {
        Self
    }
}

impl SyntheticInputSink for WindowsInputSink {
    fn send_key(&self, key: SyntheticKey) -> Result<()> {
        let mut inputs = inputs_for(key);
        let sent = unsafe {
            SendInput(
                inputs.len() as UINT,
                inputs.as_mut_ptr(),
                mem::size_of::<INPUT>() as c_int,
            )
        };
        if sent as usize != inputs.len() {
            return Err(KeyboardError::InputError(format!(
                "SendInput delivered {} of {} events for {:?}: {}",
                sent,
                inputs.len(),
                key,
                io::Error::last_os_error()
            ))
            .into());
        }
        Ok(())
    }
}

fn inputs_for(key: SyntheticKey) -> Vec<INPUT> {
    match key {
        SyntheticKey::Backspace => virtual_key_press(VK_BACK as u16),
        SyntheticKey::Enter => virtual_key_press(VK_RETURN as u16),
        SyntheticKey::Unicode(c) => {
            let mut buf = [0u16; 2];
            c.encode_utf16(&mut buf)
                .iter()
                .flat_map(|&unit| {
                    [
                        keyboard_input(0, unit, KEYEVENTF_UNICODE),
                        keyboard_input(0, unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP),
                    ]
                })
                .collect()
        }
    }
}

fn virtual_key_press(vk: u16) -> Vec<INPUT> {
    vec![
        keyboard_input(vk, 0, 0),
        keyboard_input(vk, 0, KEYEVENTF_KEYUP),
    ]
}

fn keyboard_input(vk: u16, scan: u16, flags: DWORD) -> INPUT {
    unsafe {
        let mut input: INPUT = mem::zeroed();
        input.type_ = INPUT_KEYBOARD;
        *input.u.ki_mut() = KEYBDINPUT {
            wVk: vk,
            wScan: scan,
            dwFlags: flags,
            time: 0,
            dwExtraInfo: 0,
        };
        input
    }
}
