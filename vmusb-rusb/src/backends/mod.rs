pub mod libusb;
