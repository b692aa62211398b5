//! CRC16 as used by DS cartridge headers and banners.
//!
//! Reflected polynomial `0xA001`, initial value `0xFFFF`, no final XOR
//! (the CRC-16/MODBUS parameters). The lookup table is built at compile time.

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &b| {
        (crc >> 8) ^ TABLE[((crc ^ b as u16) & 0xFF) as usize]
    })
}
