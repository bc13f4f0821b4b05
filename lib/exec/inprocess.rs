//! Direct, same-process execution. Confinement comes entirely from the
//! lexical path resolver, which is what makes this path usable without any
//! privilege at all.

use std::io::{self, Read, Write};

use crate::{
    ops::{self, Request, Response},
    FerryResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(crate) fn run(
    req: Request,
    bulk_reader: Option<&mut (dyn Read + Send)>,
    bulk_writer: Option<&mut (dyn Write + Send)>,
) -> FerryResult<Response> {
    let resolved = req.normalize(false)?;
    let (response, callback) = ops::handle(&resolved)?;
    if let Some(callback) = callback {
        let mut default_reader = io::empty();
        let mut default_writer = io::sink();
        let reader: &mut dyn Read = match bulk_reader {
            Some(reader) => reader,
            None => &mut default_reader,
        };
        let writer: &mut dyn Write = match bulk_writer {
            Some(writer) => writer,
            None => &mut default_writer,
        };
        ops::run_bulk(callback, reader, writer)?;
    }
    Ok(response)
}
