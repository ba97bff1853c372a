// ELF header 校验与 dynamic 段解析，通过 include! 嵌入 elf.rs

// 校验内存中的 ELF header：magic、class、字节序、类型、架构
fn check_elf_header(ehdr: &ElfEhdr) -> Result<(), Errno> {
    if ehdr.e_ident[..SELFMAG] != ELFMAG {
        return Err(Errno::Format);
    }
    if ehdr.e_ident[EI_CLASS] != ELFCLASS64 {
        return Err(Errno::Format);
    }
    if ehdr.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(Errno::Format);
    }
    if ehdr.e_ident[EI_VERSION] != EV_CURRENT {
        return Err(Errno::Format);
    }
    if ehdr.e_type != ET_EXEC && ehdr.e_type != ET_DYN {
        return Err(Errno::Format);
    }
    if ehdr.e_machine != EXPECTED_MACHINE {
        return Err(Errno::Format);
    }
    if ehdr.e_version as u8 != EV_CURRENT {
        return Err(Errno::Format);
    }
    Ok(())
}

impl Elf {
    // dynamic 段中的地址都是相对 vaddr 的，加上 bias 后必须不低于映像基址
    fn dyn_ptr(base_addr: usize, bias_addr: usize, value: ElfXword) -> Result<usize, Errno> {
        let addr = bias_addr.wrapping_add(value as usize);
        if addr < base_addr {
            return Err(Errno::Format);
        }
        Ok(addr)
    }

    unsafe fn parse(base_addr: usize) -> Result<ElfTables, Errno> {
        if base_addr == 0 {
            return Err(Errno::InvalidArg);
        }

        let ehdr = &*(base_addr as *const ElfEhdr);
        check_elf_header(ehdr)?;

        // 程序头表需落在首页内，避免越过调用方保证可读的范围
        let phnum = ehdr.e_phnum as usize;
        let phdr_end = (ehdr.e_phoff as usize)
            .checked_add(phnum * mem::size_of::<ElfPhdr>())
            .ok_or(Errno::Format)?;
        if ehdr.e_phentsize as usize != mem::size_of::<ElfPhdr>() || phdr_end > memory::page_size() {
            return Err(Errno::Format);
        }
        let phdrs = slice::from_raw_parts(
            (base_addr + ehdr.e_phoff as usize) as *const ElfPhdr,
            phnum,
        );

        // offset=0 的 PT_LOAD 段决定 bias（加载基址与虚拟地址之差）
        let phdr0 = phdrs
            .iter()
            .find(|ph| ph.p_type == PT_LOAD && ph.p_offset == 0)
            .ok_or(Errno::Format)?;
        if base_addr < phdr0.p_vaddr as usize {
            return Err(Errno::Format);
        }
        let bias_addr = base_addr - phdr0.p_vaddr as usize;

        let dhdr = phdrs
            .iter()
            .find(|ph| ph.p_type == PT_DYNAMIC)
            .ok_or(Errno::Format)?;
        let dyn_section = Self::dyn_ptr(base_addr, bias_addr, dhdr.p_vaddr)? as *const ElfDyn;
        let dyn_cnt = dhdr.p_memsz as usize / mem::size_of::<ElfDyn>();

        let mut tables = ElfTables {
            bias_addr,
            strtab: ptr::null(),
            symtab: ptr::null(),
            relplt: 0,
            relplt_sz: 0,
            reldyn: 0,
            reldyn_sz: 0,
            relandroid: 0,
            relandroid_sz: 0,
            bucket: ptr::null(),
            bucket_cnt: 0,
            chain: ptr::null(),
            bloom: ptr::null(),
            bloom_sz: 0,
            bloom_shift: 0,
            symoffset: 0,
            is_use_gnu_hash: false,
            is_use_rela: false,
        };

        for entry in slice::from_raw_parts(dyn_section, dyn_cnt) {
            match entry.d_tag {
                DT_NULL => break,
                DT_STRTAB => {
                    tables.strtab = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)? as *const c_char;
                }
                DT_SYMTAB => {
                    tables.symtab = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)? as *const ElfSym;
                }
                DT_PLTREL => {
                    tables.is_use_rela = entry.d_un as i64 == DT_RELA;
                }
                DT_JMPREL => {
                    tables.relplt = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)?;
                }
                DT_PLTRELSZ => {
                    tables.relplt_sz = entry.d_un as usize;
                }
                DT_REL | DT_RELA => {
                    tables.reldyn = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)?;
                    if entry.d_tag == DT_RELA {
                        tables.is_use_rela = true;
                    }
                }
                DT_RELSZ | DT_RELASZ => {
                    tables.reldyn_sz = entry.d_un as usize;
                }
                DT_ANDROID_REL | DT_ANDROID_RELA => {
                    tables.relandroid = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)?;
                }
                DT_ANDROID_RELSZ | DT_ANDROID_RELASZ => {
                    tables.relandroid_sz = entry.d_un as usize;
                }
                DT_HASH => {
                    // 已有 GNU hash 时忽略 ELF hash
                    if tables.is_use_gnu_hash {
                        continue;
                    }
                    let raw = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)? as *const u32;
                    tables.bucket_cnt = *raw;
                    tables.bucket = raw.add(2);
                    tables.chain = tables.bucket.add(tables.bucket_cnt as usize);
                }
                DT_GNU_HASH => {
                    // nbuckets | symoffset | bloom_sz | bloom_shift | bloom[] | buckets[] | chains[]
                    let raw = Self::dyn_ptr(base_addr, bias_addr, entry.d_un)? as *const u32;
                    tables.bucket_cnt = *raw;
                    tables.symoffset = *raw.add(1);
                    tables.bloom_sz = *raw.add(2);
                    tables.bloom_shift = *raw.add(3);
                    tables.bloom = raw.add(4) as *const usize;
                    tables.bucket = tables.bloom.add(tables.bloom_sz as usize) as *const u32;
                    tables.chain = tables.bucket.add(tables.bucket_cnt as usize);
                    tables.is_use_gnu_hash = true;
                }
                _ => {}
            }
        }

        // Android packed relocation 以 "APS2" 开头
        if tables.relandroid != 0 {
            if tables.relandroid_sz < 4 {
                return Err(Errno::Format);
            }
            let header = slice::from_raw_parts(tables.relandroid as *const u8, 4);
            if header != b"APS2" {
                log::error(format_args!("android rel/rela format error at {:#x}", base_addr));
                return Err(Errno::Format);
            }
            tables.relandroid += 4;
            tables.relandroid_sz -= 4;
        }

        if tables.strtab.is_null()
            || tables.symtab.is_null()
            || tables.bucket.is_null()
            || tables.chain.is_null()
            || (tables.is_use_gnu_hash && (tables.bloom.is_null() || tables.bloom_sz == 0))
        {
            return Err(Errno::Format);
        }

        log::debug(format_args!(
            "elf at {:#x}: {} {} PLT:{} DYN:{} ANDROID:{}",
            base_addr,
            if tables.is_use_rela { "RELA" } else { "REL" },
            if tables.is_use_gnu_hash {
                "GNU_HASH"
            } else {
                "ELF_HASH"
            },
            tables.relplt_sz,
            tables.reldyn_sz,
            tables.relandroid_sz
        ));

        Ok(tables)
    }
}
