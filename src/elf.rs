// 内存中 ELF 映像的只读视图：校验头部、解析 dynamic 段、按符号收集 PLT/GOT slot 地址

use crate::errno::Errno;
use crate::log;
use crate::memory;
use std::collections::BTreeSet;
use std::ffi::{CStr, c_char};
use std::mem;
use std::ptr;
use std::slice;

// ELF 符号哈希算法
mod hash;
// Android packed relocation (APS2) 解码
mod packed;


use hash::{elf_gnu_hash, elf_hash};
use packed::PackedRelocIterator;

// ELF header e_ident 相关常量
const EI_NIDENT: usize = 16;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;

const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const SELFMAG: usize = 4;

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;

// dynamic section 标签常量
const DT_NULL: i64 = 0;
const DT_PLTRELSZ: i64 = 2;
const DT_HASH: i64 = 4;
const DT_STRTAB: i64 = 5;
const DT_SYMTAB: i64 = 6;
const DT_RELA: i64 = 7;
const DT_RELASZ: i64 = 8;
const DT_REL: i64 = 17;
const DT_RELSZ: i64 = 18;
const DT_PLTREL: i64 = 20;
const DT_JMPREL: i64 = 23;
const DT_GNU_HASH: i64 = 0x6ffffef5;

// Android 私有 packed relocation 标签
const DT_ANDROID_REL: i64 = 0x6000_000f;
const DT_ANDROID_RELA: i64 = 0x6000_0010;
const DT_ANDROID_RELSZ: i64 = 0x6000_0011;
const DT_ANDROID_RELASZ: i64 = 0x6000_0012;

const EM_AARCH64: u16 = 183;
const EM_X86_64: u16 = 62;

#[cfg(target_arch = "aarch64")]
const EXPECTED_MACHINE: u16 = EM_AARCH64;
#[cfg(target_arch = "x86_64")]
const EXPECTED_MACHINE: u16 = EM_X86_64;

// 按目标架构选择 JUMP_SLOT / GLOB_DAT / ABS64 重定位类型
#[cfg(target_arch = "aarch64")]
const R_GENERIC_JUMP_SLOT: u32 = 1026;
#[cfg(target_arch = "aarch64")]
const R_GENERIC_GLOB_DAT: u32 = 1025;
#[cfg(target_arch = "aarch64")]
const R_GENERIC_ABS: u32 = 257;

#[cfg(target_arch = "x86_64")]
const R_GENERIC_JUMP_SLOT: u32 = 7;
#[cfg(target_arch = "x86_64")]
const R_GENERIC_GLOB_DAT: u32 = 6;
#[cfg(target_arch = "x86_64")]
const R_GENERIC_ABS: u32 = 1;

// ELF64 基本类型别名
type ElfAddr = u64;
type ElfOff = u64;
type ElfWord = u32;
type ElfXword = u64;
type ElfSxword = i64;
type ElfHalf = u16;

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfEhdr {
    e_ident: [u8; EI_NIDENT],
    e_type: ElfHalf,
    e_machine: ElfHalf,
    e_version: ElfWord,
    e_entry: ElfAddr,
    e_phoff: ElfOff,
    e_shoff: ElfOff,
    e_flags: ElfWord,
    e_ehsize: ElfHalf,
    e_phentsize: ElfHalf,
    e_phnum: ElfHalf,
    e_shentsize: ElfHalf,
    e_shnum: ElfHalf,
    e_shstrndx: ElfHalf,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfPhdr {
    p_type: ElfWord,
    p_flags: ElfWord,
    p_offset: ElfOff,
    p_vaddr: ElfAddr,
    p_paddr: ElfAddr,
    p_filesz: ElfXword,
    p_memsz: ElfXword,
    p_align: ElfXword,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfDyn {
    d_tag: ElfSxword,
    d_un: ElfXword,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfSym {
    st_name: ElfWord,
    st_info: u8,
    st_other: u8,
    st_shndx: ElfHalf,
    st_value: ElfAddr,
    st_size: ElfXword,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfRel {
    r_offset: ElfAddr,
    r_info: ElfXword,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ElfRela {
    r_offset: ElfAddr,
    r_info: ElfXword,
    r_addend: ElfSxword,
}

// 高 32 位为符号索引，低 32 位为重定位类型
fn elf_r_sym(info: ElfXword) -> u32 {
    (info >> 32) as u32
}

fn elf_r_type(info: ElfXword) -> u32 {
    (info & 0xffff_ffff) as u32
}

// 解析成功后才存在的表指针
struct ElfTables {
    bias_addr: usize,
    strtab: *const c_char,
    symtab: *const ElfSym,
    // .rel(a).plt
    relplt: usize,
    relplt_sz: usize,
    // .rel(a).dyn
    reldyn: usize,
    reldyn_sz: usize,
    // Android packed relocation，已跳过 APS2 头
    relandroid: usize,
    relandroid_sz: usize,
    bucket: *const u32,
    bucket_cnt: u32,
    chain: *const u32,
    bloom: *const usize,
    bloom_sz: u32,
    bloom_shift: u32,
    symoffset: u32,
    is_use_gnu_hash: bool,
    is_use_rela: bool,
}

// 某个映射起始地址处的 ELF 视图，解析失败时 valid() 为 false
pub struct Elf {
    base_addr: usize,
    tables: Option<ElfTables>,
}

// 视图只保存映像内的地址，所有访问都在 engine 锁内进行
unsafe impl Send for Elf {}

impl Elf {
    // base_addr 必须指向一段至少一页、可读的映射
    pub unsafe fn new(base_addr: usize) -> Self {
        let tables = match Self::parse(base_addr) {
            Ok(tables) => Some(tables),
            Err(err) => {
                log::debug(format_args!("no elf at {:#x}: {:?}", base_addr, err));
                None
            }
        };
        Self { base_addr, tables }
    }

    pub fn valid(&self) -> bool {
        self.tables.is_some()
    }
}

include!("elf/header.inc.rs");
include!("elf/lookup.inc.rs");
include!("elf/slots.inc.rs");
