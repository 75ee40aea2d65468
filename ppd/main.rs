use std::{
  io,
  io::Write as _,
  process,
};

use yansi::Paint as _;

fn main() {
  let Err(error) = ppd::main() else {
    return;
  };

  let mut stderr = io::stderr();

  for (depth, cause) in error.chain().enumerate() {
    let header = if depth == 0 { "error:" } else { "cause:" };

    let _ = writeln!(
      stderr,
      "{header} {cause}",
      header = header.red().bold(),
    );
  }

  process::exit(1);
}
