//! Static MIME-type to file-extension lookup for downloads whose URL and
//! declared filetype both fail to yield an extension.

pub fn extension_for(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        // Images
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/tiff" => "tif",
        "image/vnd.wap.wbmp" => "wbmp",
        "image/x-icon" => "ico",
        "image/x-jng" => "jng",
        "image/x-ms-bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        "image/avif" => "avif",

        // Audio
        "audio/midi" => "mid",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/x-m4a" => "m4a",
        "audio/x-realaudio" => "ra",

        // Video
        "video/3gpp" => "3gpp",
        "video/mp4" => "mp4",
        "video/mpeg" => "mpeg",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-flv" => "flv",
        "video/x-m4v" => "m4v",
        "video/x-mng" => "mng",
        "video/x-ms-asf" => "asf",
        "video/x-ms-wmv" => "wmv",
        "video/x-msvideo" => "avi",

        // PDF and office documents
        "application/pdf" => "pdf",
        "application/rtf" => "rtf",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.ms-powerpoint" => "ppt",
        "text/csv" => "csv",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.oasis.opendocument.text" => "odt",

        // Archives
        "application/zip" => "zip",
        "application/x-7z-compressed" => "7z",
        "application/x-rar-compressed" => "rar",

        // Fonts
        "font/woff" => "woff",
        "font/woff2" => "woff2",

        // Other applications
        "application/mac-binhex40" => "hqx",
        "application/vnd.wap.wmlc" => "wmlc",
        "application/vnd.google-earth.kml+xml" => "kml",
        "application/vnd.google-earth.kmz" => "kmz",
        "application/x-cocoa" => "cco",
        "application/x-java-archive-diff" => "jardiff",
        "application/x-java-jnlp-file" => "jnlp",
        "application/x-makeself" => "run",
        "application/x-redhat-package-manager" => "rpm",
        "application/x-sea" => "sea",
        "application/x-shockwave-flash" => "swf",
        "application/x-stuffit" => "sit",
        "application/x-xpinstall" => "xpi",
        "application/xhtml+xml" => "xhtml",
        "application/atom+xml" => "atom",

        // Web
        "application/x-javascript" => "js",
        "application/javascript" => "js",
        "application/json" => "json",
        "application/rss+xml" => "rss",
        "application/wasm" => "wasm",
        "application/xspf+xml" => "xspf",
        "text/html" => "html",
        "text/css" => "css",
        "text/xml" => "xml",

        // Others
        "text/mathml" => "mml",
        "text/plain" => "txt",
        "text/vnd.sun.j2me.app-descriptor" => "jad",
        "text/vnd.wap.wml" => "wml",
        "text/x-component" => "htc",

        _ => return None,
    };

    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_types_resolve() {
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("application/pdf"), Some("pdf"));
        assert_eq!(extension_for("text/plain"), Some("txt"));
        assert_eq!(extension_for("video/mp4"), Some("mp4"));
    }

    #[test]
    fn test_unknown_type_is_none() {
        assert_eq!(extension_for("application/x-unheard-of"), None);
        assert_eq!(extension_for(""), None);
    }
}
