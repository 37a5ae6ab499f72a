//! Motion commands understood by the turntable firmware
//!
//! One byte per command. Direction numbering is fixed:
//! stop = 0, rotate left = 1, rotate right = 2.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionCommand {
    Stop,
    RotateLeft,
    RotateRight,
}

impl MotionCommand {
    pub const ALL: [MotionCommand; 3] = [
        MotionCommand::Stop,
        MotionCommand::RotateLeft,
        MotionCommand::RotateRight,
    ];

    /// Command number before wire encoding
    pub fn code(self) -> u8 {
        match self {
            MotionCommand::Stop => 0,
            MotionCommand::RotateLeft => 1,
            MotionCommand::RotateRight => 2,
        }
    }

    pub fn encode(self, encoding: CommandEncoding) -> u8 {
        match encoding {
            CommandEncoding::Binary => self.code(),
            CommandEncoding::AsciiDigit => b'0' + self.code(),
        }
    }

    /// Motor state the firmware is in once this command has been written
    pub fn resulting_state(self) -> MotorState {
        match self {
            MotionCommand::Stop => MotorState::Inactive,
            MotionCommand::RotateLeft => MotorState::ActiveLeft,
            MotionCommand::RotateRight => MotorState::ActiveRight,
        }
    }

    pub fn is_rotation(self) -> bool {
        !matches!(self, MotionCommand::Stop)
    }
}

impl std::fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MotionCommand::Stop => "stop",
            MotionCommand::RotateLeft => "rotate-left",
            MotionCommand::RotateRight => "rotate-right",
        };
        f.write_str(name)
    }
}

/// How a command number is put on the wire.
/// Some sketches read `Serial.read() - '0'`, others compare raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandEncoding {
    #[default]
    Binary,
    #[serde(rename = "ascii", alias = "ascii_digit")]
    AsciiDigit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorState {
    #[default]
    Inactive,
    ActiveLeft,
    ActiveRight,
}

impl MotorState {
    pub fn is_active(self) -> bool {
        !matches!(self, MotorState::Inactive)
    }
}

impl std::fmt::Display for MotorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MotorState::Inactive => "inactive",
            MotorState::ActiveLeft => "rotating left",
            MotorState::ActiveRight => "rotating right",
        };
        f.write_str(name)
    }
}
