use std::ffi::c_char;

static mut LEN_SINK: usize = 0;

#[unsafe(no_mangle)]
pub extern "C" fn plt_test_trigger() {
    let msg = b"plt-test-trigger\0";
    unsafe {
        let _ = libc::puts(msg.as_ptr() as *const c_char);
    }
}

#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn plt_test_trigger_with_input(msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    unsafe {
        let len = libc::strlen(msg);
        std::ptr::write_volatile(std::ptr::addr_of_mut!(LEN_SINK), len);
        let _ = libc::puts(msg);
    }
}
