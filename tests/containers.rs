use twlkit::Error;
use twlkit::compression::LzFormat;
use twlkit::formats::bmg::{Bmg, Encoding, Message, parse_message};
use twlkit::formats::narc::Narc;
use twlkit::formats::nitrofs::{NitroDirectory, NitroFile, NitroFs};
use twlkit::formats::rom::Rom;
use twlkit::formats::utility::Utility;
use twlkit::fs::{Compression, FileFormat, MemoryBuffer, Stream};

fn to_bytes<F: FileFormat>(format: &mut F, compression: Compression) -> Vec<u8> {
    let mut s = Stream::memory();
    s.open_write(compression).unwrap();
    format.write_to(&mut s).unwrap();
    s.close().unwrap();
    s.into_bytes()
}

fn open(bytes: Vec<u8>) -> Stream<MemoryBuffer> {
    let mut s = Stream::from_bytes(bytes);
    s.open_read().unwrap();
    s
}

fn two_directories() -> NitroFs {
    let mut fs = NitroFs::default();
    for (name, byte) in [("a", 0xAA), ("b", 0xBB)] {
        let mut dir = NitroDirectory::new(name);
        dir.files.push(NitroFile::new("x.bin", vec![byte; 3]));
        fs.root.dirs.push(dir);
    }
    fs
}

fn small_rom() -> Rom {
    let mut rom = Rom::default();
    rom.header.set_game_title("INTEGRATION");
    rom.header.set_game_code("AINE");
    rom.header.nintendo_logo = [0x24; 156];
    rom.arm9 = vec![0x99; 0x10];
    rom.arm7 = vec![0x77; 0x10];
    rom.fs = two_directories();
    rom
}

#[test]
fn name_table_follows_insertion_order() {
    let mut narc = Narc::new(two_directories());
    let bytes = to_bytes(&mut narc, Compression::None);

    // Root sub-table: "a" then "b", each a directory entry with its ID.
    let root_table = [0x81, b'a', 0x01, 0xF0, 0x81, b'b', 0x02, 0xF0, 0x00];
    assert!(bytes.windows(root_table.len()).any(|w| w == root_table));

    let back = Narc::parse(&mut open(bytes)).unwrap();
    assert_eq!(back.fs.find_file_by_id(0).unwrap().data, [0xAA; 3]);
    assert_eq!(back.fs.find_file_by_id(1).unwrap().data, [0xBB; 3]);
    assert_eq!(back.fs.find_file_by_path("/b//x.bin").unwrap().id, 1);
}

#[test]
fn utility_roundtrip_compressed() {
    let mut util = Utility::default();
    util.fs = two_directories();
    let bytes = to_bytes(&mut util, Compression::Lz(LzFormat::Lz11));
    assert_eq!(bytes[0], 0x11);

    let back = Utility::parse(&mut open(bytes)).unwrap();
    assert_eq!(back.fs, util.fs);
}

#[test]
fn rom_roundtrip_through_os_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.nds");

    let mut rom = small_rom();
    let mut s = Stream::file(&path);
    s.open_write(Compression::None).unwrap();
    rom.write_to(&mut s).unwrap();
    s.close().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), rom.header.rom_size as u64);

    let mut s = Stream::file(&path);
    s.open_read().unwrap();
    let back = Rom::parse(&mut s).unwrap();
    s.close().unwrap();
    assert_eq!(back, rom);
    assert_eq!(back.header.game_code(), "AINE");
    assert_eq!(back.fs.find_file_by_path("a/x.bin").unwrap().data, [0xAA; 3]);
}

#[test]
fn rom_logo_crc_checked_first() {
    let mut rom = small_rom();
    let mut bytes = to_bytes(&mut rom, Compression::None);
    bytes[0xC0] = !bytes[0xC0];
    // Also break the FAT offset; the logo check must still be reported.
    bytes[0x48..0x4C].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        Rom::parse(&mut open(bytes)),
        Err(Error::LogoCrcMismatch { .. })
    ));
}

#[test]
fn bmg_roundtrip_from_text_dialect() {
    let lines = ["Hello {FF-01}world", "{{not an escape}}", ""];
    let messages = lines
        .iter()
        .enumerate()
        .map(|(i, line)| Message {
            id: Some(i as u32 * 10),
            attributes: vec![i as u8; 2],
            tokens: parse_message(line).unwrap(),
        })
        .collect();
    let mut bmg = Bmg::new(Encoding::Utf16, 1, messages);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("msg.bmg");
    let mut s = Stream::file(&path);
    s.open_write(Compression::Lz(LzFormat::Lz10)).unwrap();
    bmg.write_to(&mut s).unwrap();
    s.close().unwrap();

    let mut s = Stream::file(&path);
    s.open_read().unwrap();
    assert_eq!(s.compression(), Some(LzFormat::Lz10));
    let back = Bmg::parse(&mut s).unwrap();

    let texts: Vec<String> = back.messages.iter().map(Message::to_text).collect();
    assert_eq!(texts, lines);
    assert_eq!(back.messages[2].id, Some(20));
}

#[cfg(feature = "interchange")]
#[test]
fn bmg_json_bridge() {
    let mut bmg = Bmg::new(
        Encoding::Utf8,
        0,
        vec![Message::new(parse_message("a{0A}b").unwrap())],
    );
    let json = bmg.to_json().unwrap();
    let mut imported = Bmg::from_json(&json).unwrap();

    let bytes = to_bytes(&mut imported, Compression::None);
    assert_eq!(to_bytes(&mut bmg, Compression::None), bytes);
    let back = Bmg::parse(&mut open(bytes)).unwrap();
    assert_eq!(back.messages[0].to_text(), "a{0A}b");
}

#[cfg(feature = "interchange")]
#[test]
fn bmg_xml_bridge() {
    let mut bmg = Bmg::new(
        Encoding::ShiftJis,
        7,
        vec![Message {
            id: Some(0x64),
            attributes: vec![1, 2, 3, 4],
            tokens: parse_message("<b>{1A-06}&").unwrap(),
        }],
    );
    let xml = bmg.to_xml();
    assert!(xml.contains("<bmg encoding=\"Shift JIS\" id=\"7\">"));
    let mut imported = Bmg::from_xml(&xml).unwrap();
    assert_eq!(imported, bmg);
    assert_eq!(
        to_bytes(&mut imported, Compression::None),
        to_bytes(&mut bmg, Compression::None)
    );
}

fn narc_bytes() -> Vec<u8> {
    to_bytes(&mut Narc::new(two_directories()), Compression::None)
}

#[test]
fn narc_block_size_past_end_is_an_error() {
    let mut bytes = narc_bytes();
    bytes[0x14..0x18].copy_from_slice(&0x10_0000u32.to_le_bytes());
    assert!(Narc::parse(&mut open(bytes)).is_err());
}

#[test]
fn narc_file_range_past_end_is_an_error() {
    let mut bytes = narc_bytes();
    bytes[0x1C..0x20].copy_from_slice(&0x10_0000u32.to_le_bytes());
    bytes[0x20..0x24].copy_from_slice(&0x10_0004u32.to_le_bytes());
    assert!(matches!(
        Narc::parse(&mut open(bytes)),
        Err(Error::UnexpectedEof)
    ));
}

#[test]
fn bmg_message_offset_past_end_is_an_error() {
    let mut bmg = Bmg::new(Encoding::Utf16, 0, vec![Message::new(parse_message("hi").unwrap())]);
    let mut bytes = to_bytes(&mut bmg, Compression::None);
    bytes[0x30..0x34].copy_from_slice(&0x1_0000u32.to_le_bytes());
    assert!(Bmg::parse(&mut open(bytes)).is_err());
}
