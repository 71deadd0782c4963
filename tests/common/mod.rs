// Not every test binary uses every helper.
#![allow(dead_code)]

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

const SIGNATURE: u32 = 0x4643534d;
const FLAG_PREV: u16 = 0x1;
const FLAG_NEXT: u16 = 0x2;
const FLAG_RESERVE: u16 = 0x4;
const IFOLD_FROM_PREV: u16 = 0xfffd;
const IFOLD_TO_NEXT: u16 = 0xfffe;
const IFOLD_PREV_AND_NEXT: u16 = 0xffff;

// ========================================================================= //

/// One cabinet unit, parsed and checked against the format's invariants.
#[derive(Debug)]
pub struct Unit {
    pub flags: u16,
    pub set_id: u16,
    pub index: u16,
    pub reserve: Vec<u8>,
    pub prev: Option<(String, String)>,
    pub next: Option<(String, String)>,
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
}

#[derive(Debug)]
pub struct Folder {
    pub compression_type: u16,
    pub blocks: Vec<Block>,
}

#[derive(Debug)]
pub struct Block {
    pub uncompressed_size: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct File {
    pub name: String,
    pub size: u32,
    pub offset: u32,
    pub folder_index: u16,
    pub date: u16,
    pub time: u16,
    pub attributes: u16,
}

fn read_cstring(reader: &mut Cursor<&[u8]>) -> String {
    let mut bytes = Vec::new();
    loop {
        let byte = reader.read_u8().unwrap();
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    assert!(bytes.len() <= 255);
    String::from_utf8(bytes).unwrap()
}

/// Parses a unit, asserting that its sizes, offsets, counts and checksums
/// are consistent.
pub fn parse_unit(bytes: &[u8]) -> Unit {
    let mut reader = Cursor::new(bytes);
    assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), SIGNATURE);
    assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 0);
    let total_size = reader.read_u32::<LittleEndian>().unwrap();
    assert_eq!(total_size as usize, bytes.len());
    assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 0);
    let first_file_offset = reader.read_u32::<LittleEndian>().unwrap();
    assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 0);
    assert_eq!(reader.read_u8().unwrap(), 3);
    assert_eq!(reader.read_u8().unwrap(), 1);
    let num_folders = reader.read_u16::<LittleEndian>().unwrap();
    let num_files = reader.read_u16::<LittleEndian>().unwrap();
    let flags = reader.read_u16::<LittleEndian>().unwrap();
    assert_eq!(flags & !(FLAG_PREV | FLAG_NEXT | FLAG_RESERVE), 0);
    let set_id = reader.read_u16::<LittleEndian>().unwrap();
    let index = reader.read_u16::<LittleEndian>().unwrap();

    let mut reserve = Vec::new();
    if flags & FLAG_RESERVE != 0 {
        let header_reserve = reader.read_u16::<LittleEndian>().unwrap();
        assert_eq!(reader.read_u8().unwrap(), 0);
        assert_eq!(reader.read_u8().unwrap(), 0);
        reserve = vec![0; header_reserve as usize];
        reader.read_exact(&mut reserve).unwrap();
    }
    let prev = if flags & FLAG_PREV != 0 {
        Some((read_cstring(&mut reader), read_cstring(&mut reader)))
    } else {
        None
    };
    let next = if flags & FLAG_NEXT != 0 {
        Some((read_cstring(&mut reader), read_cstring(&mut reader)))
    } else {
        None
    };

    let mut folder_headers = Vec::new();
    for _ in 0..num_folders {
        let data_offset = reader.read_u32::<LittleEndian>().unwrap();
        let num_blocks = reader.read_u16::<LittleEndian>().unwrap();
        let compression_type = reader.read_u16::<LittleEndian>().unwrap();
        folder_headers.push((data_offset, num_blocks, compression_type));
    }
    assert_eq!(reader.position(), first_file_offset as u64);

    let mut files = Vec::new();
    for _ in 0..num_files {
        let size = reader.read_u32::<LittleEndian>().unwrap();
        let offset = reader.read_u32::<LittleEndian>().unwrap();
        let folder_index = reader.read_u16::<LittleEndian>().unwrap();
        let date = reader.read_u16::<LittleEndian>().unwrap();
        let time = reader.read_u16::<LittleEndian>().unwrap();
        let attributes = reader.read_u16::<LittleEndian>().unwrap();
        let name = read_cstring(&mut reader);
        match folder_index {
            IFOLD_FROM_PREV => assert!(flags & FLAG_PREV != 0),
            IFOLD_TO_NEXT => assert!(flags & FLAG_NEXT != 0),
            IFOLD_PREV_AND_NEXT => {
                let both = FLAG_PREV | FLAG_NEXT;
                assert_eq!(flags & both, both)
            }
            index => assert!(index < num_folders),
        }
        files.push(File {
            name,
            size,
            offset,
            folder_index,
            date,
            time,
            attributes,
        });
    }

    let mut folders = Vec::new();
    for (data_offset, num_blocks, compression_type) in folder_headers {
        assert_eq!(reader.position(), data_offset as u64);
        let mut blocks = Vec::new();
        for _ in 0..num_blocks {
            let checksum = reader.read_u32::<LittleEndian>().unwrap();
            let compressed_size = reader.read_u16::<LittleEndian>().unwrap();
            let uncompressed_size = reader.read_u16::<LittleEndian>().unwrap();
            assert!(uncompressed_size as usize <= 0x8000);
            assert!(compressed_size as usize <= 0x8000 + 12);
            let mut payload = vec![0u8; compressed_size as usize];
            reader.read_exact(&mut payload).unwrap();
            assert_eq!(
                cabset::data_block_checksum(
                    &payload,
                    compressed_size,
                    uncompressed_size
                ),
                checksum
            );
            blocks.push(Block { uncompressed_size, payload });
        }
        folders.push(Folder { compression_type, blocks });
    }
    assert_eq!(reader.position() as usize, bytes.len());

    Unit { flags, set_id, index, reserve, prev, next, folders, files }
}

// ========================================================================= //

/// Joins MS-ZIP block payloads into one raw deflate stream and inflates it.
/// A stored fallback block carries its own final bit, which only the last
/// block may keep.
pub fn inflate_mszip(blocks: &[&Block]) -> Vec<u8> {
    if blocks.is_empty() {
        return Vec::new();
    }
    let mut stream = Vec::new();
    for (index, block) in blocks.iter().enumerate() {
        assert_eq!(&block.payload[..2], b"CK");
        let mut body = block.payload[2..].to_vec();
        let is_stored = body.len() == block.uncompressed_size as usize + 5
            && body[0] == 1;
        if is_stored && index + 1 < blocks.len() {
            body[0] = 0;
        }
        stream.extend_from_slice(&body);
    }
    let mut output = Vec::new();
    flate2::read::DeflateDecoder::new(stream.as_slice())
        .read_to_end(&mut output)
        .unwrap();
    output
}

fn decode_folder(compression_type: u16, blocks: &[&Block]) -> Vec<u8> {
    let data = match compression_type {
        0 => blocks.iter().flat_map(|block| block.payload.clone()).collect(),
        1 => inflate_mszip(blocks),
        other => panic!("unexpected compression type {}", other),
    };
    let expected: usize =
        blocks.iter().map(|block| block.uncompressed_size as usize).sum();
    assert_eq!(data.len(), expected);
    data
}

fn local_folder(unit: &Unit, file: &File) -> usize {
    match file.folder_index {
        IFOLD_FROM_PREV => 0,
        IFOLD_TO_NEXT => unit.folders.len() - 1,
        IFOLD_PREV_AND_NEXT => {
            assert_eq!(unit.folders.len(), 1, "{} spans both ways", file.name);
            0
        }
        index => index as usize,
    }
}

fn carries_from_prev(file: &File) -> bool {
    file.folder_index == IFOLD_FROM_PREV
        || file.folder_index == IFOLD_PREV_AND_NEXT
}

fn carries_to_next(file: &File) -> bool {
    file.folder_index == IFOLD_TO_NEXT
        || file.folder_index == IFOLD_PREV_AND_NEXT
}

fn record_key(file: &File) -> (&str, u32, u32) {
    (file.name.as_str(), file.offset, file.size)
}

/// Whether the first folder of `unit` carries on the last folder of the
/// unit before it.  Only the iFolder markers say so, and both units must
/// agree on the records marking the continuation.
fn continues_previous(prev: &Unit, unit: &Unit) -> bool {
    let spilled: Vec<_> = prev
        .files
        .iter()
        .filter(|f| carries_to_next(f))
        .map(record_key)
        .collect();
    let carried: Vec<_> = unit
        .files
        .iter()
        .filter(|f| carries_from_prev(f))
        .map(record_key)
        .collect();
    assert_eq!(
        spilled, carried,
        "units {} and {} disagree on a continued folder",
        prev.index, unit.index
    );
    if carried.is_empty() {
        return false;
    }
    assert!(!unit.folders.is_empty());
    assert!(!prev.folders.is_empty());
    true
}

/// Parses every unit of a set, checks the links between them, and returns
/// the `(name, data)` of each file, in the order the records appear.  Copies
/// of a record carried over from the previous unit are only checked.
pub fn extract_set(units: &[(String, Vec<u8>)]) -> Vec<(String, Vec<u8>)> {
    let parsed: Vec<Unit> =
        units.iter().map(|(_, bytes)| parse_unit(bytes)).collect();
    for (index, unit) in parsed.iter().enumerate() {
        assert_eq!(unit.index as usize, index);
        assert_eq!(unit.set_id, parsed[0].set_id);
        assert_eq!(unit.prev.is_some(), index > 0);
        assert_eq!(unit.next.is_some(), index + 1 < parsed.len());
        if let Some((ref cabinet, _)) = unit.prev {
            assert_eq!(cabinet, &units[index - 1].0);
        }
        if let Some((ref cabinet, _)) = unit.next {
            assert_eq!(cabinet, &units[index + 1].0);
        }
    }
    if let Some(last) = parsed.last() {
        assert!(!last.files.iter().any(carries_to_next));
    }

    // Gather the blocks of each logical folder across units.
    let mut logical: Vec<(u16, Vec<&Block>)> = Vec::new();
    let mut folder_maps: Vec<Vec<usize>> = Vec::new();
    for (index, unit) in parsed.iter().enumerate() {
        let continued =
            index > 0 && continues_previous(&parsed[index - 1], unit);
        let mut map = Vec::new();
        for (folder_index, folder) in unit.folders.iter().enumerate() {
            if continued && folder_index == 0 {
                let last = logical.len() - 1;
                assert_eq!(logical[last].0, folder.compression_type);
                logical[last].1.extend(folder.blocks.iter());
            } else {
                let blocks = folder.blocks.iter().collect();
                logical.push((folder.compression_type, blocks));
            }
            map.push(logical.len() - 1);
        }
        folder_maps.push(map);
    }
    let streams: Vec<Vec<u8>> = logical
        .iter()
        .map(|(ctype, blocks)| decode_folder(*ctype, blocks))
        .collect();

    let mut files = Vec::new();
    for (unit, map) in parsed.iter().zip(folder_maps.iter()) {
        for file in unit.files.iter() {
            let stream = &streams[map[local_folder(unit, file)]];
            let start = file.offset as usize;
            let end = start + file.size as usize;
            assert!(end <= stream.len(), "{} runs past its folder", file.name);
            if !carries_from_prev(file) {
                files.push((file.name.clone(), stream[start..end].to_vec()));
            }
        }
    }
    files
}

/// The `(name, iFolder)` of each record of a parsed unit.
pub fn folder_indices(unit: &Unit) -> Vec<(String, u16)> {
    unit.files
        .iter()
        .map(|file| (file.name.clone(), file.folder_index))
        .collect()
}

// ========================================================================= //
