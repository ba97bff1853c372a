// Android packed relocation（APS2 头之后的 SLEB128 分组编码）解码

use crate::errno::Errno;
use std::mem;

use super::ElfXword;

// 分组标志位：组内共享 r_info / offset delta / addend
const RELOCATION_GROUPED_BY_INFO_FLAG: usize = 1;
const RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG: usize = 2;
const RELOCATION_GROUPED_BY_ADDEND_FLAG: usize = 4;
const RELOCATION_GROUP_HAS_ADDEND_FLAG: usize = 8;

struct Sleb128Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Sleb128Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    // 每字节 7 位有效数据，最高位为续传标志，末字节第 6 位为符号位
    fn next(&mut self) -> Result<usize, Errno> {
        let size = mem::size_of::<usize>() * 8;
        let mut value = 0usize;
        let mut shift = 0usize;
        loop {
            let byte = *self.data.get(self.pos).ok_or(Errno::Format)?;
            self.pos += 1;
            if shift < size {
                value |= ((byte & 0x7f) as usize) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < size && byte & 0x40 != 0 {
                    value |= !0usize << shift;
                }
                return Ok(value);
            }
        }
    }
}

pub(super) struct PackedReloc {
    pub(super) r_offset: usize,
    pub(super) r_info: ElfXword,
}

pub(super) struct PackedRelocIterator<'a> {
    decoder: Sleb128Decoder<'a>,
    is_use_rela: bool,
    relocation_count: usize,
    relocation_index: usize,
    group_size: usize,
    group_index: usize,
    group_flags: usize,
    group_r_offset_delta: usize,
    r_offset: usize,
    r_info: usize,
    r_addend: isize,
    failed: bool,
}

impl<'a> PackedRelocIterator<'a> {
    pub(super) fn new(data: &'a [u8], is_use_rela: bool) -> Result<Self, Errno> {
        let mut decoder = Sleb128Decoder::new(data);
        let relocation_count = decoder.next()?;
        let r_offset = decoder.next()?;
        Ok(Self {
            decoder,
            is_use_rela,
            relocation_count,
            relocation_index: 0,
            group_size: 0,
            group_index: 0,
            group_flags: 0,
            group_r_offset_delta: 0,
            r_offset,
            r_info: 0,
            r_addend: 0,
            failed: false,
        })
    }

    fn read_group_header(&mut self) -> Result<(), Errno> {
        self.group_size = self.decoder.next()?;
        self.group_flags = self.decoder.next()?;

        if self.group_flags & RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG != 0 {
            self.group_r_offset_delta = self.decoder.next()?;
        }
        if self.group_flags & RELOCATION_GROUPED_BY_INFO_FLAG != 0 {
            self.r_info = self.decoder.next()?;
        }

        let has_addend = self.group_flags & RELOCATION_GROUP_HAS_ADDEND_FLAG != 0;
        if has_addend && self.group_flags & RELOCATION_GROUPED_BY_ADDEND_FLAG != 0 {
            if !self.is_use_rela {
                return Err(Errno::Format);
            }
            self.r_addend = self.r_addend.wrapping_add(self.decoder.next()? as isize);
        } else if !has_addend {
            self.r_addend = 0;
        }

        self.group_index = 0;
        Ok(())
    }

    fn decode_next(&mut self) -> Result<PackedReloc, Errno> {
        if self.group_index == self.group_size {
            self.read_group_header()?;
        }

        if self.group_flags & RELOCATION_GROUPED_BY_OFFSET_DELTA_FLAG != 0 {
            self.r_offset = self.r_offset.wrapping_add(self.group_r_offset_delta);
        } else {
            self.r_offset = self.r_offset.wrapping_add(self.decoder.next()?);
        }
        if self.group_flags & RELOCATION_GROUPED_BY_INFO_FLAG == 0 {
            self.r_info = self.decoder.next()?;
        }
        if self.is_use_rela
            && self.group_flags & RELOCATION_GROUP_HAS_ADDEND_FLAG != 0
            && self.group_flags & RELOCATION_GROUPED_BY_ADDEND_FLAG == 0
        {
            self.r_addend = self.r_addend.wrapping_add(self.decoder.next()? as isize);
        }

        self.relocation_index += 1;
        self.group_index += 1;
        Ok(PackedReloc {
            r_offset: self.r_offset,
            r_info: self.r_info as ElfXword,
        })
    }
}

// 解码出错后产出一次 Err 并终止
impl Iterator for PackedRelocIterator<'_> {
    type Item = Result<PackedReloc, Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.relocation_index >= self.relocation_count {
            return None;
        }
        let item = self.decode_next();
        self.failed = item.is_err();
        Some(item)
    }
}
