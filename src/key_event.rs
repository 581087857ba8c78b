//! Normalized key-down events as delivered by a keystroke source.

/// Virtual-key codes the pipeline cares about (Windows numbering).
pub mod vk {
    pub const BACK: u32 = 0x08;
    pub const TAB: u32 = 0x09;
    pub const RETURN: u32 = 0x0D;
    pub const SHIFT: u32 = 0x10;
    pub const CONTROL: u32 = 0x11;
    pub const MENU: u32 = 0x12;
    pub const SPACE: u32 = 0x20;
    /// Page Up, first of the navigation block.
    pub const PRIOR: u32 = 0x21;
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const LEFT: u32 = 0x25;
    /// Arrow down, last key that resets the buffer.
    pub const DOWN: u32 = 0x28;
    /// Help, end of the editing block reported as special.
    pub const HELP: u32 = 0x2F;
    pub const F1: u32 = 0x70;
    pub const F24: u32 = 0x87;
    pub const LSHIFT: u32 = 0xA0;
    pub const RSHIFT: u32 = 0xA1;
    pub const LCONTROL: u32 = 0xA2;
    pub const RCONTROL: u32 = 0xA3;
    pub const LMENU: u32 = 0xA4;
    pub const RMENU: u32 = 0xA5;
    /// Carrier code for injected `KEYEVENTF_UNICODE` input.
    pub const PACKET: u32 = 0xE7;
}

/// One physical key-down, already resolved against the active layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub vk_code: u32,
    pub character: Option<char>,
    pub is_special: bool,
}

impl KeyEvent {
    /// Builds an event from a virtual-key code and the character the layout
    /// produced for it. Special keys never carry a character, and neither do
    /// control characters other than tab.
    pub fn new(vk_code: u32, character: Option<char>) -> Self {
        let is_special = is_special_key(vk_code);
        let character = if is_special {
            None
        } else {
            character.filter(|c| !c.is_control() || *c == '\t')
        };

        Self {
            vk_code,
            character,
            is_special,
        }
    }

    pub fn is_backspace(&self) -> bool {
        self.vk_code == vk::BACK
    }

    pub fn is_enter(&self) -> bool {
        self.vk_code == vk::RETURN
    }

    /// Ctrl/Alt or caret movement: the buffer no longer sits next to the caret.
    pub fn resets_buffer(&self) -> bool {
        is_ctrl_or_alt(self.vk_code) || is_navigation_key(self.vk_code)
    }
}

pub fn is_special_key(vk_code: u32) -> bool {
    matches!(
        vk_code,
        vk::BACK | vk::RETURN | vk::SHIFT | vk::CONTROL | vk::MENU
    ) || (vk::PRIOR..=vk::HELP).contains(&vk_code)
        || (vk::F1..=vk::F24).contains(&vk_code)
        || (vk::LSHIFT..=vk::RMENU).contains(&vk_code)
}

pub fn is_ctrl_or_alt(vk_code: u32) -> bool {
    matches!(
        vk_code,
        vk::CONTROL | vk::MENU | vk::LCONTROL | vk::RCONTROL | vk::LMENU | vk::RMENU
    )
}

pub fn is_navigation_key(vk_code: u32) -> bool {
    (vk::PRIOR..=vk::DOWN).contains(&vk_code)
}

/// Event a US layout would report for typing `c`. Test helper.
#[cfg(test)]
pub(crate) fn typed(c: char) -> KeyEvent {
    match c {
        '\n' => KeyEvent::new(vk::RETURN, None),
        ' ' => KeyEvent::new(vk::SPACE, Some(' ')),
        '\t' => KeyEvent::new(vk::TAB, Some('\t')),
        c if c.is_ascii_alphanumeric() => {
            KeyEvent::new(c.to_ascii_uppercase() as u32, Some(c))
        }
        // OEM keys; the exact code is irrelevant to the pipeline.
        c => KeyEvent::new(0xBA, Some(c)),
    }
}

#[cfg(test)]
pub(crate) fn typed_str(text: &str) -> Vec<KeyEvent> {
    text.chars().map(typed).collect()
}
