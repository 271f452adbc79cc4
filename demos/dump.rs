use std::{env::args, fs::File, io::Read};

use anyhow::{bail, Result};

use quickle_codec::{loads, registry::EmptyRegistry};

fn main() -> Result<()> {
    let mut fp = if let Some(fname) = args().nth(1) {
        println!("* Dumping: {fname}\n");
        File::open(fname)?
    } else {
        bail!("Specify a file containing an encoded byte stream!");
    };
    let mut buf = Vec::with_capacity(fp.metadata().map(|md| md.len() as usize).unwrap_or(16384));
    let _ = fp.read_to_end(&mut buf)?;
    let value = loads(&buf, &EmptyRegistry)?;
    println!("{value:#?}");
    Ok(())
}
