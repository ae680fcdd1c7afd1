use std::os::raw::{c_char, c_int, c_void};

pub type LogCallback = Option<unsafe extern "C" fn(*mut c_void, c_int, *const c_char)>;

unsafe extern "C" {
    pub fn my_set_logger(ctx: *mut c_void, callback: LogCallback, user_data: *mut c_void);
    #[link_name = "my_version"]
    pub fn version() -> u32;
}
