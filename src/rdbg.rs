// (c) Roel Kluin, 2023, GPL v3

/// Print a formatted line to stderr, in debug builds only.
#[macro_export]
macro_rules! dbg_print {
	($($arg:tt)*) => ({
		if cfg!(debug_assertions) {
			eprintln!("[{}:{}] {}", file!(), line!(), format!($($arg)*));
		}
	})
}

#[macro_export]
macro_rules! dbgf {
	($l:literal) => ({
		if cfg!(debug_assertions) {
			eprintln!("[{}:{}] {}", file!(), line!(), stringify!($l));
		}
		$l
	});
	($expr:expr, $fmt:literal$(, $opt:expr)*) => {
		match $expr {
			expr => {
				if cfg!(debug_assertions) {
					eprintln!(concat!("[{}:{}] {} = ", $fmt), file!(), line!(), stringify!($expr), &expr$(, $opt)*);
				}
				expr
			}
		}
	}
}

#[macro_export]
macro_rules! dbgx {
	($expr:expr) => ({
		if cfg!(debug_assertions) {
			dbg!($expr)
		} else {
			$expr
		}
	})
}
