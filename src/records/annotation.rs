use std::fmt::Write;
use std::path::Path;

use crate::detection::types::Detection;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Pascal VOC annotation pairing `image_path` with every detection's box, scaled to the
/// reference frame size.
pub fn pascal_voc(image_path: &Path, detections: &[Detection], width: u32, height: u32) -> String {
    let filename = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder = image_path
        .parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut objects = String::new();
    for detection in detections {
        let (xmin, ymin, xmax, ymax) = detection.rect.to_pixels(width, height);
        let _ = write!(
            objects,
            "
    <object>
        <name>{}</name>
        <pose>Unspecified</pose>
        <truncated>0</truncated>
        <difficult>0</difficult>
        <bndbox>
            <xmin>{}</xmin>
            <ymin>{}</ymin>
            <xmax>{}</xmax>
            <ymax>{}</ymax>
        </bndbox>
    </object>",
            escape(&detection.label),
            xmin,
            ymin,
            xmax,
            ymax
        );
    }

    format!(
        "<annotation>
    <folder>{}</folder>
    <filename>{}</filename>
    <path>{}</path>
    <source>
        <database>Unknown</database>
    </source>
    <size>
        <width>{}</width>
        <height>{}</height>
        <depth>3</depth>
    </size>
    <segmented>0</segmented>{}
</annotation>
",
        escape(&folder),
        escape(&filename),
        escape(&image_path.to_string_lossy()),
        width,
        height,
        objects
    )
}
