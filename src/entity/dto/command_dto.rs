//! direct command data transmission objects

/// arguments of the setLEDColor method, range checked by the commander
#[derive(Debug, Clone, PartialEq)]
pub struct LedColorDto {
    pub red: i64,
    pub green: i64,
    pub blue: i64,
}
