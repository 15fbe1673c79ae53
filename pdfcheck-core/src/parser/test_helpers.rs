//! Helper functions for creating valid test PDFs with correct offsets

use std::collections::BTreeMap;

/// Lay out `objects` after a header and finish with a correct xref table.
/// `trailer_extra` is spliced into the trailer dictionary after `/Root 1 0 R`.
pub fn assemble(
    version: &str,
    objects: &[(u32, &str)],
    trailer_extra: &str,
) -> (Vec<u8>, BTreeMap<u32, usize>) {
    let mut pdf = format!("%PDF-{version}\n").into_bytes();
    pdf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
    let mut offsets = BTreeMap::new();

    for (number, body) in objects {
        offsets.insert(*number, pdf.len());
        pdf.extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
    }

    let size = objects.iter().map(|(n, _)| n + 1).max().unwrap_or(1);
    let xref_start = pdf.len();
    let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
    for number in 1..size {
        match offsets.get(&number) {
            Some(offset) => xref.push_str(&format!("{offset:010} 00000 n \n")),
            None => xref.push_str("0000000000 00001 f \n"),
        }
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {size} /Root 1 0 R {trailer_extra}>>\nstartxref\n{xref_start}\n%%EOF\n"
    ));
    pdf.extend_from_slice(xref.as_bytes());

    (pdf, offsets)
}

/// Catalog, empty page tree
pub fn create_minimal_pdf() -> Vec<u8> {
    assemble(
        "1.4",
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
        ],
        "",
    )
    .0
}

/// One page, an Info dictionary and a file ID
pub fn create_pdf_with_info() -> Vec<u8> {
    assemble(
        "1.6",
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
            (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>"),
            (
                4,
                "<< /Title (Test PDF) /Author (Test Author) /CreationDate (D:20230405060708Z) >>",
            ),
        ],
        "/Info 4 0 R /ID [<00112233445566778899AABBCCDDEEFF> <00112233445566778899AABBCCDDEEFF>] ",
    )
    .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pdf_structure() {
        let pdf = create_minimal_pdf();
        assert!(pdf.starts_with(b"%PDF-1.4\n"));
        assert!(pdf.ends_with(b"%%EOF\n"));

        let pdf_str = String::from_utf8_lossy(&pdf);
        assert!(pdf_str.contains("xref\n0 3\n"));
        assert!(pdf_str.contains("startxref"));
    }

    #[test]
    fn test_offsets_point_at_objects() {
        let (pdf, offsets) = assemble("1.7", &[(1, "null"), (3, "true")], "");
        assert!(pdf[offsets[&1]..].starts_with(b"1 0 obj"));
        assert!(pdf[offsets[&3]..].starts_with(b"3 0 obj"));
        assert!(String::from_utf8_lossy(&pdf).contains("0000000000 00001 f \n"));
    }
}

/// 8x8 grayscale baseline JPEG skeleton with a one-code Huffman table pair
pub fn tiny_jpeg() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    // DQT: table 0, all ones
    data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
    data.extend(std::iter::repeat(1u8).take(64));
    // SOF0: 8 bits, 8x8, one component using table 0
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 8, 0, 8, 0, 8, 1, 1, 0x11, 0]);
    // DHT: DC table 0 and AC table 0, one 1-bit code each
    for class in [0x00u8, 0x10] {
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, class]);
        let mut counts = [0u8; 16];
        counts[0] = 1;
        data.extend_from_slice(&counts);
        data.push(0);
    }
    // SOS: one component, tables 0/0, Ss=0 Se=63
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 63, 0]);
    data.extend_from_slice(&[0x00, 0xFF, 0x00, 0x12]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}
