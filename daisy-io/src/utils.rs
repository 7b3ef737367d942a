use std::fmt::Display;

pub struct Hex<T>(pub T);

impl Display for Hex<u32> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

const MAX_DISPLAY: usize = 16;

pub struct ShortHex<'a>(pub &'a [u8]);

impl Display for ShortHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (shown, rest) = self.0.split_at(self.0.len().min(MAX_DISPLAY));
        for byte in shown {
            write!(f, "{byte:02X}")?;
        }
        if !rest.is_empty() {
            f.write_str("...")?;
        }
        Ok(())
    }
}
