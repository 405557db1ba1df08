use rand::Rng;

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%";

/// Length of passwords issued to system-created parent accounts.
pub const GENERATED_PASSWORD_LEN: usize = 8;

/// Builds a child registration code of the form `P-{year}-{NNNN}`.
pub fn generate_child_code<R: Rng + ?Sized>(year: i32, rng: &mut R) -> String {
    let number: u16 = rng.gen_range(1000..=9999);
    format!("P-{year}-{number}")
}

/// Random password drawn from letters, digits and `!@#$%`.
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// Returns `true` when `code` has the shape produced by [`generate_child_code`].
pub fn is_child_code_shape(code: &str) -> bool {
    let mut parts = code.split('-');
    let (Some("P"), Some(year), Some(number), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && number.len() == 4
        && number.bytes().all(|b| b.is_ascii_digit())
}
