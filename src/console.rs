//! Console output used by the logger and the page-table dumper.

use core::fmt;
#[cfg(target_arch = "riscv64")]
use core::fmt::Write;

#[cfg(target_arch = "riscv64")]
struct Stdout;

#[cfg(target_arch = "riscv64")]
impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            crate::sbi::console_putchar(c as usize);
        }
        Ok(())
    }
}

/// Print formatted arguments to the console.
#[cfg(target_arch = "riscv64")]
pub fn print(args: fmt::Arguments) {
    Stdout.write_fmt(args).unwrap();
}

#[cfg(all(not(target_arch = "riscv64"), test))]
pub fn print(args: fmt::Arguments) {
    std::print!("{args}");
}

// Foreign non-test targets have no console; output is dropped.
#[cfg(all(not(target_arch = "riscv64"), not(test)))]
pub fn print(args: fmt::Arguments) {
    let _ = args;
}

#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!($fmt $(, $($arg)+)?))
    };
}

#[macro_export]
macro_rules! println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    };
}
